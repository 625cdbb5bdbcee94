use crate::{
    Algorithm,
    env::Env,
    exploration::ExplorationStrategy,
    policies::Policy,
    replay_buffer::Transition,
    sampler::EnvWorker,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Scalars reported by a single gradient step of an off-policy agent.
#[derive(Debug, Clone, Copy, Default)]
pub struct OffPolicyStats {
    pub qval_loss: f32,
    /// Only present on steps where the actor was updated.
    pub action_loss: Option<f32>,
    pub mean_qval: f32,
    pub mean_target: f32,
}

pub trait OffPolicyAgent {
    type Policy: Policy;

    fn policy(&self) -> &Self::Policy;

    fn store_transition(&mut self, transition: Transition) -> Result<()>;

    /// Whether the replay buffer holds enough transitions to start optimizing.
    fn ready_to_train(&self) -> bool;

    /// One gradient step. `samples_data` holds the transitions collected in the latest cycle.
    fn train_step(&mut self, itr: usize, samples_data: &[Transition]) -> Result<OffPolicyStats>;
}

/// How much data is collected and how many gradient steps are taken in between.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct OffPolicySchedule {
    pub n_epochs: usize,
    pub n_epoch_cycles: usize,
    pub env_steps_per_cycle: usize,
    pub n_train_steps: usize,
}

impl Default for OffPolicySchedule {
    fn default() -> Self {
        Self {
            n_epochs: 500,
            n_epoch_cycles: 20,
            env_steps_per_cycle: 100,
            n_train_steps: 50,
        }
    }
}

pub trait OffPolicyAlgorithmHooks {
    fn init_hook(&mut self) -> bool {
        false
    }

    fn post_train_step_hook(&mut self, _itr: usize, _stats: &OffPolicyStats) -> bool {
        false
    }

    fn post_epoch_hook(&mut self, epoch: usize, episode_returns: &[f32]) -> bool;

    fn shutdown_hook(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Averages the statistics of every epoch and logs them.
#[derive(Debug, Default)]
pub struct DefaultOffPolicyAlgorithmHooks {
    qval_losses: Vec<f32>,
    action_losses: Vec<f32>,
    qvals: Vec<f32>,
    targets: Vec<f32>,
    /// Average undiscounted return of the episodes finished in each epoch.
    pub average_returns: Vec<f32>,
}

impl DefaultOffPolicyAlgorithmHooks {
    pub fn last_average_return(&self) -> Option<f32> {
        self.average_returns.last().copied()
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        f32::NAN
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

impl OffPolicyAlgorithmHooks for DefaultOffPolicyAlgorithmHooks {
    fn post_train_step_hook(&mut self, itr: usize, stats: &OffPolicyStats) -> bool {
        debug!(
            itr,
            qval_loss = stats.qval_loss,
            action_loss = stats.action_loss,
            "train step"
        );
        self.qval_losses.push(stats.qval_loss);
        self.qvals.push(stats.mean_qval);
        self.targets.push(stats.mean_target);
        if let Some(action_loss) = stats.action_loss {
            self.action_losses.push(action_loss);
        }
        false
    }

    fn post_epoch_hook(&mut self, epoch: usize, episode_returns: &[f32]) -> bool {
        let average_return = mean(episode_returns);
        if !episode_returns.is_empty() {
            self.average_returns.push(average_return);
        }
        info!(
            epoch,
            episodes = episode_returns.len(),
            average_return,
            qval_loss = mean(&self.qval_losses),
            action_loss = mean(&self.action_losses),
            average_q = mean(&self.qvals),
            average_y = mean(&self.targets),
            "epoch finished"
        );
        self.qval_losses.clear();
        self.action_losses.clear();
        self.qvals.clear();
        self.targets.clear();
        false
    }
}

pub struct OffPolicyAlgorithm<E: Env, A: OffPolicyAgent, H: OffPolicyAlgorithmHooks> {
    pub worker: EnvWorker<E>,
    pub agent: A,
    pub exploration: Box<dyn ExplorationStrategy>,
    pub schedule: OffPolicySchedule,
    pub hooks: H,
    env_steps: usize,
    train_steps: usize,
}

impl<E: Env, A: OffPolicyAgent, H: OffPolicyAlgorithmHooks> OffPolicyAlgorithm<E, A, H> {
    pub fn new(
        worker: EnvWorker<E>,
        agent: A,
        exploration: Box<dyn ExplorationStrategy>,
        schedule: OffPolicySchedule,
        hooks: H,
    ) -> Self {
        Self {
            worker,
            agent,
            exploration,
            schedule,
            hooks,
            env_steps: 0,
            train_steps: 0,
        }
    }

    pub fn env_steps(&self) -> usize {
        self.env_steps
    }

    pub fn train_steps(&self) -> usize {
        self.train_steps
    }

    /// Steps the environment with exploration noise and stores every transition.
    pub fn collect_cycle(&mut self, episode_returns: &mut Vec<f32>) -> Result<Vec<Transition>> {
        let mut samples = Vec::with_capacity(self.schedule.env_steps_per_cycle);
        for _ in 0..self.schedule.env_steps_per_cycle {
            if self.worker.needs_reset() {
                self.exploration.reset();
            }
            let state = self.worker.current_state()?;
            let action =
                self.exploration
                    .get_action(self.env_steps, &state, self.agent.policy())?;
            let step = self.worker.step(action)?;
            self.env_steps += 1;
            if let Some(ret) = step.episode_return {
                episode_returns.push(ret);
            }
            let transition = Transition::from_tensors(
                &step.state,
                &step.action,
                step.reward,
                &step.next_state,
                step.terminated,
            )?;
            self.agent.store_transition(transition.clone())?;
            samples.push(transition);
        }
        Ok(samples)
    }
}

impl<E: Env, A: OffPolicyAgent, H: OffPolicyAlgorithmHooks> Algorithm
    for OffPolicyAlgorithm<E, A, H>
{
    fn train(&mut self) -> Result<()> {
        if self.hooks.init_hook() {
            return Ok(());
        }
        'epochs: for epoch in 0..self.schedule.n_epochs {
            let mut episode_returns = vec![];
            for _ in 0..self.schedule.n_epoch_cycles {
                let samples = self.collect_cycle(&mut episode_returns)?;
                if !self.agent.ready_to_train() {
                    continue;
                }
                for _ in 0..self.schedule.n_train_steps {
                    let stats = self.agent.train_step(self.train_steps, &samples)?;
                    let stop = self.hooks.post_train_step_hook(self.train_steps, &stats);
                    self.train_steps += 1;
                    if stop {
                        break 'epochs;
                    }
                }
            }
            if self.hooks.post_epoch_hook(epoch, &episode_returns) {
                break;
            }
        }
        self.hooks.shutdown_hook()
    }
}
