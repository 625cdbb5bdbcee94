use anyhow::Result;
use candle_core::Tensor;
use tracing::trace;
use twinrl_core::env::{Env, EnvironmentDescription, SnapShot};

/// Truncates episodes after `max_path_length` steps. A truncated step is not terminal, the
/// value of its successor state is still bootstrapped.
pub struct TimeLimit<E: Env> {
    env: E,
    max_path_length: usize,
    elapsed: usize,
}

impl<E: Env> TimeLimit<E> {
    pub fn new(env: E, max_path_length: usize) -> Self {
        Self {
            env,
            max_path_length,
            elapsed: 0,
        }
    }

    pub fn inner(&self) -> &E {
        &self.env
    }

    pub fn elapsed(&self) -> usize {
        self.elapsed
    }
}

impl<E: Env> Env for TimeLimit<E> {
    fn reset(&mut self, seed: u64) -> Result<Tensor> {
        self.elapsed = 0;
        self.env.reset(seed)
    }

    fn step(&mut self, action: &Tensor) -> Result<SnapShot> {
        let mut snapshot = self.env.step(action)?;
        self.elapsed += 1;
        if self.elapsed >= self.max_path_length && !snapshot.terminated {
            snapshot.truncated = true;
            trace!(elapsed = self.elapsed, "episode truncated");
        }
        Ok(snapshot)
    }

    fn env_description(&self) -> EnvironmentDescription {
        self.env.env_description()
    }
}
