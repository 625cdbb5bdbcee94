use crate::{env::Space, error::TwinRlError, policies::Policy, rng::standard_normal};
use anyhow::Result;
use candle_core::Tensor;

/// Perturbs the actions of a deterministic policy during data collection.
pub trait ExplorationStrategy {
    fn get_action(&mut self, itr: usize, observation: &Tensor, policy: &dyn Policy)
    -> Result<Tensor>;

    /// Called at the start of every episode.
    fn reset(&mut self) {}
}

fn action_bounds(action_space: &Space) -> Result<(Vec<f32>, Vec<f32>)> {
    let (low, high) = action_space.bounds().ok_or_else(|| {
        TwinRlError::InvalidConfig("exploration needs a bounded continuous action space".into())
    })?;
    Ok((low.to_vec(), high.to_vec()))
}

fn perturb(action: &Tensor, noise: &[f32], low: &[f32], high: &[f32]) -> Result<Tensor> {
    let action: Vec<f32> = action.flatten_all()?.to_vec1()?;
    let perturbed: Vec<f32> = action
        .iter()
        .zip(noise)
        .zip(low.iter().zip(high))
        .map(|((a, n), (l, h))| (a + n).clamp(*l, *h))
        .collect();
    Ok(Tensor::from_vec(
        perturbed,
        action.len(),
        &candle_core::Device::Cpu,
    )?)
}

/// Additive gaussian noise with a standard deviation annealed linearly from `max_sigma` to
/// `min_sigma` over `decay_period` steps.
#[derive(Debug, Clone)]
pub struct GaussianStrategy {
    low: Vec<f32>,
    high: Vec<f32>,
    max_sigma: f32,
    min_sigma: f32,
    decay_period: usize,
}

impl GaussianStrategy {
    pub fn new(
        action_space: &Space,
        max_sigma: f32,
        min_sigma: f32,
        decay_period: usize,
    ) -> Result<Self> {
        let (low, high) = action_bounds(action_space)?;
        Ok(Self {
            low,
            high,
            max_sigma,
            min_sigma,
            decay_period,
        })
    }

    pub fn constant(action_space: &Space, sigma: f32) -> Result<Self> {
        Self::new(action_space, sigma, sigma, 1)
    }

    pub fn sigma(&self, itr: usize) -> f32 {
        let progress = (itr as f32 / self.decay_period.max(1) as f32).min(1.);
        self.max_sigma - (self.max_sigma - self.min_sigma) * progress
    }
}

impl ExplorationStrategy for GaussianStrategy {
    fn get_action(
        &mut self,
        itr: usize,
        observation: &Tensor,
        policy: &dyn Policy,
    ) -> Result<Tensor> {
        let action = policy.get_action(observation)?;
        let sigma = self.sigma(itr);
        let noise: Vec<f32> = (0..self.low.len())
            .map(|_| standard_normal() * sigma)
            .collect();
        perturb(&action, &noise, &self.low, &self.high)?
            .to_device(action.device())
            .map_err(Into::into)
    }
}

/// Temporally correlated noise from an Ornstein-Uhlenbeck process.
#[derive(Debug, Clone)]
pub struct OuStrategy {
    low: Vec<f32>,
    high: Vec<f32>,
    mu: f32,
    sigma: f32,
    theta: f32,
    dt: f32,
    state: Vec<f32>,
}

impl OuStrategy {
    pub fn new(action_space: &Space, mu: f32, sigma: f32, theta: f32, dt: f32) -> Result<Self> {
        let (low, high) = action_bounds(action_space)?;
        let state = vec![mu; low.len()];
        Ok(Self {
            low,
            high,
            mu,
            sigma,
            theta,
            dt,
            state,
        })
    }

    pub fn state(&self) -> &[f32] {
        &self.state
    }

    fn evolve_state(&mut self) -> Vec<f32> {
        for x in self.state.iter_mut() {
            let dx = self.theta * (self.mu - *x) * self.dt
                + self.sigma * self.dt.sqrt() * standard_normal();
            *x += dx;
        }
        self.state.clone()
    }
}

impl ExplorationStrategy for OuStrategy {
    fn get_action(
        &mut self,
        _itr: usize,
        observation: &Tensor,
        policy: &dyn Policy,
    ) -> Result<Tensor> {
        let action = policy.get_action(observation)?;
        let noise = self.evolve_state();
        perturb(&action, &noise, &self.low, &self.high)?
            .to_device(action.device())
            .map_err(Into::into)
    }

    fn reset(&mut self) {
        self.state = vec![self.mu; self.low.len()];
    }
}

#[cfg(test)]
mod test {
    use super::{ExplorationStrategy, GaussianStrategy, OuStrategy};
    use crate::{env::Space, policies::Policy, rng};
    use anyhow::Result;
    use candle_core::{Device, Tensor};

    struct ConstantPolicy(f32);

    impl Policy for ConstantPolicy {
        fn get_action(&self, _observation: &Tensor) -> Result<Tensor> {
            Ok(Tensor::new(&[self.0, self.0], &Device::Cpu)?)
        }
    }

    fn space() -> Space {
        Space::bounded(vec![-1., -1.], vec![1., 1.])
    }

    #[test]
    fn gaussian_actions_stay_in_bounds() -> Result<()> {
        rng::seed(3);
        let mut strategy = GaussianStrategy::constant(&space(), 5.)?;
        let obs = Tensor::zeros(3, candle_core::DType::F32, &Device::Cpu)?;
        for itr in 0..100 {
            let action: Vec<f32> = strategy
                .get_action(itr, &obs, &ConstantPolicy(0.9))?
                .to_vec1()?;
            assert!(action.iter().all(|a| (-1. ..=1.).contains(a)));
        }
        Ok(())
    }

    #[test]
    fn gaussian_sigma_decays_linearly() -> Result<()> {
        let strategy = GaussianStrategy::new(&space(), 1., 0.1, 10)?;
        assert_eq!(strategy.sigma(0), 1.);
        assert!((strategy.sigma(5) - 0.55).abs() < 1e-6);
        assert!((strategy.sigma(10) - 0.1).abs() < 1e-6);
        assert!((strategy.sigma(1000) - 0.1).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn ou_reset_restores_the_mean() -> Result<()> {
        rng::seed(5);
        let mut strategy = OuStrategy::new(&space(), 0., 0.3, 0.15, 1e-2)?;
        let obs = Tensor::zeros(3, candle_core::DType::F32, &Device::Cpu)?;
        for itr in 0..10 {
            strategy.get_action(itr, &obs, &ConstantPolicy(0.))?;
        }
        assert!(strategy.state().iter().any(|x| *x != 0.));
        strategy.reset();
        assert!(strategy.state().iter().all(|x| *x == 0.));
        Ok(())
    }

    #[test]
    fn unbounded_space_is_rejected() {
        let space = Space::continuous_from_dims(vec![2]);
        assert!(GaussianStrategy::constant(&space, 0.1).is_err());
    }
}
