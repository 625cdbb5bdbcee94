use anyhow::{Result, ensure};
use candle_core::{Device, Tensor};
use rand::{Rng, SeedableRng, rngs::StdRng};
use twinrl_core::env::{Env, EnvironmentDescription, SnapShot, Space};

/// Largest displacement per step along each axis.
pub const MAX_STEP: f32 = 0.1;
const START_RANGE: f32 = 2.;

/// A point in the plane that has to be moved to the origin. The action is a displacement in
/// `[-0.1, 0.1]²`, the reward is the negative distance to the origin after the move and the episode
/// terminates once the point is within `goal_radius`.
#[derive(Debug, Clone)]
pub struct PointMass {
    position: [f32; 2],
    goal_radius: f32,
    rng: StdRng,
    device: Device,
}

impl Default for PointMass {
    fn default() -> Self {
        Self::new(0.05, Device::Cpu)
    }
}

impl PointMass {
    pub fn new(goal_radius: f32, device: Device) -> Self {
        Self {
            position: [START_RANGE, START_RANGE],
            goal_radius,
            rng: StdRng::seed_from_u64(0),
            device,
        }
    }

    pub fn position(&self) -> [f32; 2] {
        self.position
    }

    pub fn set_position(&mut self, position: [f32; 2]) {
        self.position = position;
    }

    fn distance(&self) -> f32 {
        self.position[0].hypot(self.position[1])
    }

    fn observation(&self) -> Result<Tensor> {
        Ok(Tensor::new(&self.position, &self.device)?)
    }
}

impl Env for PointMass {
    fn reset(&mut self, seed: u64) -> Result<Tensor> {
        self.rng = StdRng::seed_from_u64(seed);
        // start outside the goal so that every episode takes at least one step
        loop {
            self.position = [
                self.rng.random_range(-START_RANGE..START_RANGE),
                self.rng.random_range(-START_RANGE..START_RANGE),
            ];
            if self.distance() > self.goal_radius {
                break;
            }
        }
        self.observation()
    }

    fn step(&mut self, action: &Tensor) -> Result<SnapShot> {
        let action: Vec<f32> = action.flatten_all()?.to_vec1()?;
        ensure!(action.len() == 2, "point mass expects a 2d displacement");
        for (p, a) in self.position.iter_mut().zip(action) {
            *p += a.clamp(-MAX_STEP, MAX_STEP);
        }
        let distance = self.distance();
        Ok(SnapShot {
            state: self.observation()?,
            reward: -distance,
            terminated: distance < self.goal_radius,
            truncated: false,
        })
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(
            Space::continuous_from_dims(vec![2]),
            Space::bounded(vec![-MAX_STEP; 2], vec![MAX_STEP; 2]),
        )
    }
}

#[cfg(test)]
mod test {
    use super::PointMass;
    use anyhow::Result;
    use candle_core::{Device, Tensor};
    use twinrl_core::env::Env;

    #[test]
    fn moving_to_the_origin_terminates() -> Result<()> {
        let mut env = PointMass::default();
        env.set_position([0.22, 0.]);
        let action = Tensor::new(&[-1f32, 0.], &Device::Cpu)?;
        let first = env.step(&action)?;
        assert!(!first.terminated);
        assert!((first.reward + 0.12).abs() < 1e-6);
        let last = env.step(&action)?;
        assert!(last.terminated);
        Ok(())
    }

    #[test]
    fn resets_start_outside_the_goal() -> Result<()> {
        let mut env = PointMass::new(0.5, Device::Cpu);
        for seed in 0..50 {
            let obs: Vec<f32> = env.reset(seed)?.to_vec1()?;
            assert!(obs[0].hypot(obs[1]) > 0.5);
        }
        Ok(())
    }
}
