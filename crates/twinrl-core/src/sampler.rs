use crate::{
    env::{Env, EnvironmentDescription},
    policies::Policy,
    rng::RNG,
    utils::rollout_buffer::RolloutBuffer,
};
use anyhow::Result;
use candle_core::Tensor;
use rand::Rng;

/// Outcome of a single environment step taken by an `EnvWorker`.
#[derive(Debug, Clone)]
pub struct WorkerStep {
    pub state: Tensor,
    pub action: Tensor,
    pub reward: f32,
    pub next_state: Tensor,
    /// The environment reached a terminal state, the value of `next_state` must not be
    /// bootstrapped.
    pub terminated: bool,
    /// The episode ended, either terminated or cut off by the time limit.
    pub done: bool,
    /// Undiscounted return of the episode that just ended.
    pub episode_return: Option<f32>,
}

/// Owns a single environment and tracks the running episode.
pub struct EnvWorker<E: Env> {
    env: E,
    state: Option<Tensor>,
    path_length: usize,
    episode_return: f32,
    max_path_length: Option<usize>,
}

impl<E: Env> EnvWorker<E> {
    pub fn new(env: E, max_path_length: Option<usize>) -> Self {
        Self {
            env,
            state: None,
            path_length: 0,
            episode_return: 0.,
            max_path_length,
        }
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn env_description(&self) -> EnvironmentDescription {
        self.env.env_description()
    }

    /// Returns true when the next call to `current_state` starts a new episode.
    pub fn needs_reset(&self) -> bool {
        self.state.is_none()
    }

    pub fn current_state(&mut self) -> Result<Tensor> {
        match &self.state {
            Some(state) => Ok(state.clone()),
            None => {
                let seed = RNG.with_borrow_mut(|rng| rng.random::<u64>());
                let state = self.env.reset(seed)?;
                self.path_length = 0;
                self.episode_return = 0.;
                self.state = Some(state.clone());
                Ok(state)
            }
        }
    }

    pub fn step(&mut self, action: Tensor) -> Result<WorkerStep> {
        let state = self.current_state()?;
        let snapshot = self.env.step(&action)?;
        self.path_length += 1;
        self.episode_return += snapshot.reward;
        let timed_out = self
            .max_path_length
            .is_some_and(|max_len| self.path_length >= max_len);
        let done = snapshot.done() || timed_out;
        let episode_return = done.then_some(self.episode_return);
        self.state = if done {
            None
        } else {
            Some(snapshot.state.clone())
        };
        Ok(WorkerStep {
            state,
            action,
            reward: snapshot.reward,
            next_state: snapshot.state,
            terminated: snapshot.terminated,
            done,
            episode_return,
        })
    }
}

/// Collects a fixed number of steps from every environment per rollout. Episodes that end are
/// restarted within the same rollout.
pub struct StepBoundSampler<E: Env> {
    pub workers: Vec<EnvWorker<E>>,
    pub n_steps: usize,
    episode_returns: Vec<f32>,
}

impl<E: Env> StepBoundSampler<E> {
    pub fn new(envs: Vec<E>, n_steps: usize, max_path_length: Option<usize>) -> Self {
        let workers = envs
            .into_iter()
            .map(|env| EnvWorker::new(env, max_path_length))
            .collect();
        Self {
            workers,
            n_steps,
            episode_returns: vec![],
        }
    }

    pub fn env_description(&self) -> Option<EnvironmentDescription> {
        self.workers.first().map(|w| w.env_description())
    }

    /// Returns of the episodes completed since the last call.
    pub fn take_episode_returns(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.episode_returns)
    }

    pub fn collect_rollouts(&mut self, policy: &dyn Policy) -> Result<Vec<RolloutBuffer>> {
        let mut rollouts = Vec::with_capacity(self.workers.len());
        for worker in self.workers.iter_mut() {
            let mut rollout = RolloutBuffer::default();
            for _ in 0..self.n_steps {
                let state = worker.current_state()?;
                let action = policy.get_action(&state)?;
                let step = worker.step(action)?;
                if let Some(ret) = step.episode_return {
                    self.episode_returns.push(ret);
                }
                rollout.push(step.state, step.action, step.reward, step.done);
            }
            let last_state = worker.current_state()?;
            rollout.set_last_state(last_state);
            rollouts.push(rollout);
        }
        Ok(rollouts)
    }
}
