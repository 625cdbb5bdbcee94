use anyhow::{Result, ensure};
use candle_core::{Device, Tensor};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::f32::consts::PI;
use twinrl_core::env::{Env, EnvironmentDescription, SnapShot, Space};

pub const MAX_SPEED: f32 = 8.;
pub const MAX_TORQUE: f32 = 2.;
const DT: f32 = 0.05;
const G: f32 = 10.;
const M: f32 = 1.;
const L: f32 = 1.;

/// Wraps an angle into `[-π, π)`.
pub fn angle_normalize(x: f32) -> f32 {
    (x + PI).rem_euclid(2. * PI) - PI
}

/// Classic pendulum swing-up.
///
/// The observation is `[cos(θ), sin(θ), θ̇]` with `θ = 0` upright, the action is a single torque
/// in `[-2, 2]`. Every step costs `θ² + 0.1·θ̇² + 0.001·u²`, measured before the step is
/// integrated. The task never terminates, wrap it in a `TimeLimit`.
#[derive(Debug, Clone)]
pub struct Pendulum {
    theta: f32,
    theta_dot: f32,
    rng: StdRng,
    device: Device,
}

impl Default for Pendulum {
    fn default() -> Self {
        Self::new(Device::Cpu)
    }
}

impl Pendulum {
    pub fn new(device: Device) -> Self {
        Self {
            theta: PI,
            theta_dot: 0.,
            rng: StdRng::seed_from_u64(0),
            device,
        }
    }

    /// Angle and angular velocity.
    pub fn state(&self) -> (f32, f32) {
        (self.theta, self.theta_dot)
    }

    pub fn set_state(&mut self, theta: f32, theta_dot: f32) {
        self.theta = theta;
        self.theta_dot = theta_dot.clamp(-MAX_SPEED, MAX_SPEED);
    }

    fn observation(&self) -> Result<Tensor> {
        let obs = [self.theta.cos(), self.theta.sin(), self.theta_dot];
        Ok(Tensor::new(&obs, &self.device)?)
    }
}

impl Env for Pendulum {
    fn reset(&mut self, seed: u64) -> Result<Tensor> {
        self.rng = StdRng::seed_from_u64(seed);
        self.theta = self.rng.random_range(-PI..PI);
        self.theta_dot = self.rng.random_range(-1f32..1.);
        self.observation()
    }

    fn step(&mut self, action: &Tensor) -> Result<SnapShot> {
        let action: Vec<f32> = action.flatten_all()?.to_vec1()?;
        ensure!(action.len() == 1, "pendulum expects a single torque");
        let u = action[0].clamp(-MAX_TORQUE, MAX_TORQUE);
        let th = angle_normalize(self.theta);
        let cost = th.powi(2) + 0.1 * self.theta_dot.powi(2) + 0.001 * u.powi(2);

        let theta_acc = 3. * G / (2. * L) * self.theta.sin() + 3. / (M * L * L) * u;
        self.theta_dot = (self.theta_dot + theta_acc * DT).clamp(-MAX_SPEED, MAX_SPEED);
        self.theta += self.theta_dot * DT;
        Ok(SnapShot {
            state: self.observation()?,
            reward: -cost,
            terminated: false,
            truncated: false,
        })
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(
            Space::bounded(vec![-1., -1., -MAX_SPEED], vec![1., 1., MAX_SPEED]),
            Space::bounded(vec![-MAX_TORQUE], vec![MAX_TORQUE]),
        )
    }
}
