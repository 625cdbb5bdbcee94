use anyhow::Result;
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use std::{cell::RefCell, rc::Rc};
use twinrl_core::{
    env::{Env, EnvironmentDescription, SnapShot, Space},
    error::TwinRlError,
    utils::running_mean::RunningMeanStd,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Standardize observations with running statistics gathered from every observation seen.
    pub normalize_obs: bool,
    pub reward_scale: f32,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            normalize_obs: false,
            reward_scale: 1.,
        }
    }
}

/// Observation statistics that several environments can update and read.
pub type SharedObsStats = Rc<RefCell<RunningMeanStd>>;

const OBS_EPSILON: f64 = 1e-8;

/// Presents a bounded continuous action space as `[-1, 1]` to the agent. Actions are mapped
/// affinely onto the bounds of the wrapped environment and clipped.
pub struct NormalizedEnv<E: Env> {
    env: E,
    low: Vec<f32>,
    high: Vec<f32>,
    obs_stats: Option<SharedObsStats>,
    update_obs_stats: bool,
    reward_scale: f32,
    device: Device,
}

impl<E: Env> NormalizedEnv<E> {
    pub fn new(env: E, config: NormalizeConfig, device: Device) -> Result<Self> {
        let description = env.env_description();
        let Some((low, high)) = description.action_space.bounds() else {
            return Err(TwinRlError::InvalidConfig(
                "only bounded continuous action spaces can be normalized".into(),
            )
            .into());
        };
        let (low, high) = (low.to_vec(), high.to_vec());
        let obs_stats = if config.normalize_obs {
            Some(Rc::new(RefCell::new(RunningMeanStd::new(
                description.observation_size(),
                &device,
            )?)))
        } else {
            None
        };
        Ok(Self {
            env,
            low,
            high,
            obs_stats,
            update_obs_stats: true,
            reward_scale: config.reward_scale,
            device,
        })
    }

    pub fn inner(&self) -> &E {
        &self.env
    }

    pub fn obs_stats(&self) -> Option<&SharedObsStats> {
        self.obs_stats.as_ref()
    }

    /// Normalizes observations with `stats` instead of the environment's own statistics.
    pub fn with_obs_stats(mut self, stats: SharedObsStats) -> Result<Self> {
        let size = stats.borrow().mean.elem_count();
        let observation_size = self.env.env_description().observation_size();
        if size != observation_size {
            return Err(TwinRlError::ParameterMismatch(format!(
                "observation statistics of size {size} for observations of size {observation_size}"
            ))
            .into());
        }
        self.obs_stats = Some(stats);
        Ok(self)
    }

    /// Stops updating the observation statistics, observations are normalized with the
    /// statistics as they are now.
    pub fn freeze_obs_stats(mut self) -> Self {
        self.update_obs_stats = false;
        self
    }

    /// `low + (a + 1)·(high − low)/2`, clipped to the bounds.
    pub fn scale_action(&self, action: &Tensor) -> Result<Tensor> {
        let action: Vec<f32> = action.flatten_all()?.to_vec1()?;
        let scaled: Vec<f32> = action
            .iter()
            .zip(self.low.iter().zip(self.high.iter()))
            .map(|(a, (low, high))| (low + (a + 1.) * 0.5 * (high - low)).clamp(*low, *high))
            .collect();
        Ok(Tensor::from_vec(scaled, self.low.len(), &self.device)?)
    }

    fn observe(&mut self, obs: Tensor) -> Result<Tensor> {
        let Some(stats) = &self.obs_stats else {
            return Ok(obs);
        };
        if self.update_obs_stats {
            stats.borrow_mut().update(&obs.unsqueeze(0)?)?;
        }
        Ok(stats.borrow().normalize(&obs, OBS_EPSILON)?)
    }
}

impl<E: Env> Env for NormalizedEnv<E> {
    fn reset(&mut self, seed: u64) -> Result<Tensor> {
        let obs = self.env.reset(seed)?;
        self.observe(obs)
    }

    fn step(&mut self, action: &Tensor) -> Result<SnapShot> {
        let action = self.scale_action(action)?;
        let snapshot = self.env.step(&action)?;
        Ok(SnapShot {
            state: self.observe(snapshot.state)?,
            reward: snapshot.reward * self.reward_scale,
            ..snapshot
        })
    }

    fn env_description(&self) -> EnvironmentDescription {
        let description = self.env.env_description();
        let size = self.low.len();
        EnvironmentDescription::new(
            description.observation_space,
            Space::bounded(vec![-1.; size], vec![1.; size]),
        )
    }
}

#[cfg(test)]
mod test {
    use super::{NormalizeConfig, NormalizedEnv};
    use crate::{Pendulum, PointMass};
    use anyhow::Result;
    use candle_core::{Device, Tensor};
    use twinrl_core::env::{Env, EnvironmentDescription, SnapShot, Space};

    #[test]
    fn actions_are_mapped_onto_the_bounds() -> Result<()> {
        let env = NormalizedEnv::new(Pendulum::default(), NormalizeConfig::default(), Device::Cpu)?;
        let scale = |a: f32| -> Result<f32> {
            let action = Tensor::new(&[a], &Device::Cpu)?;
            Ok(env.scale_action(&action)?.to_vec1::<f32>()?[0])
        };
        assert_eq!(scale(-1.)?, -2.);
        assert_eq!(scale(0.)?, 0.);
        assert_eq!(scale(0.5)?, 1.);
        assert_eq!(scale(3.)?, 2.);
        let (low, high) = env.env_description().action_space.bounds().map_or(
            (vec![], vec![]),
            |(low, high)| (low.to_vec(), high.to_vec()),
        );
        assert_eq!((low, high), (vec![-1.], vec![1.]));
        Ok(())
    }

    #[test]
    fn rewards_are_scaled() -> Result<()> {
        let config = NormalizeConfig {
            reward_scale: 10.,
            ..Default::default()
        };
        let mut env = NormalizedEnv::new(PointMass::default(), config, Device::Cpu)?;
        env.reset(0)?;
        let distance = {
            let [x, y] = env.inner().position();
            x.hypot(y)
        };
        let snapshot = env.step(&Tensor::new(&[0f32, 0.], &Device::Cpu)?)?;
        assert!((snapshot.reward + 10. * distance).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn normalized_observations_track_running_statistics() -> Result<()> {
        let config = NormalizeConfig {
            normalize_obs: true,
            ..Default::default()
        };
        let mut env = NormalizedEnv::new(Pendulum::default(), config, Device::Cpu)?;
        env.reset(1)?;
        for _ in 0..100 {
            env.step(&Tensor::new(&[1f32], &Device::Cpu)?)?;
        }
        let stats = env.obs_stats().map(|stats| stats.borrow().count);
        assert!(stats.is_some_and(|count| count > 100.));
        Ok(())
    }

    fn normalizing() -> NormalizeConfig {
        NormalizeConfig {
            normalize_obs: true,
            ..Default::default()
        }
    }

    #[test]
    fn frozen_statistics_are_shared_but_not_updated() -> Result<()> {
        let mut train = NormalizedEnv::new(Pendulum::default(), normalizing(), Device::Cpu)?;
        train.reset(3)?;
        for _ in 0..50 {
            train.step(&Tensor::new(&[0.3f32], &Device::Cpu)?)?;
        }
        let Some(stats) = train.obs_stats().cloned() else {
            anyhow::bail!("observation normalization is enabled");
        };
        let count = stats.borrow().count;

        let mut eval = NormalizedEnv::new(Pendulum::default(), normalizing(), Device::Cpu)?
            .with_obs_stats(stats.clone())?
            .freeze_obs_stats();
        let mut raw = Pendulum::default();
        let obs = eval.reset(42)?;
        let expected = stats.borrow().normalize(&raw.reset(42)?, 1e-8)?;
        assert_eq!(obs.to_vec1::<f32>()?, expected.to_vec1::<f32>()?);
        for _ in 0..5 {
            let snapshot = eval.step(&Tensor::new(&[0f32], &Device::Cpu)?)?;
            let raw_snapshot = raw.step(&Tensor::new(&[0f32], &Device::Cpu)?)?;
            let expected = stats.borrow().normalize(&raw_snapshot.state, 1e-8)?;
            assert_eq!(snapshot.state.to_vec1::<f32>()?, expected.to_vec1::<f32>()?);
        }
        assert_eq!(stats.borrow().count, count);
        Ok(())
    }

    #[test]
    fn statistics_of_the_wrong_size_are_rejected() -> Result<()> {
        let point_mass = NormalizedEnv::new(PointMass::default(), normalizing(), Device::Cpu)?;
        let Some(stats) = point_mass.obs_stats().cloned() else {
            anyhow::bail!("observation normalization is enabled");
        };
        let pendulum = NormalizedEnv::new(Pendulum::default(), normalizing(), Device::Cpu)?;
        assert!(pendulum.with_obs_stats(stats).is_err());
        Ok(())
    }

    struct Unbounded;

    impl Env for Unbounded {
        fn reset(&mut self, _seed: u64) -> Result<Tensor> {
            Ok(Tensor::zeros(1, candle_core::DType::F32, &Device::Cpu)?)
        }

        fn step(&mut self, _action: &Tensor) -> Result<SnapShot> {
            unreachable!()
        }

        fn env_description(&self) -> EnvironmentDescription {
            EnvironmentDescription::new(
                Space::continuous_from_dims(vec![1]),
                Space::continuous_from_dims(vec![1]),
            )
        }
    }

    #[test]
    fn unbounded_action_spaces_are_rejected() {
        assert!(NormalizedEnv::new(Unbounded, NormalizeConfig::default(), Device::Cpu).is_err());
    }
}
