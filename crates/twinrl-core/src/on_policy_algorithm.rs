use crate::{
    Algorithm, env::Env, policies::Policy, sampler::StepBoundSampler,
    utils::rollout_buffer::RolloutBuffer,
};
use anyhow::Result;
use tracing::info;

macro_rules! break_on_hook_res {
    ($hook_res:expr) => {
        if $hook_res {
            break;
        }
    };
}

pub trait OnPolicyAgent {
    type Policy: Policy;

    fn policy(&self) -> &Self::Policy;

    /// Instruments learning with the rollout buffers collected
    fn learn(&mut self, rollouts: Vec<RolloutBuffer>) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub enum LearningSchedule {
    RolloutBound {
        total_rollouts: usize,
        current_rollout: usize,
    },
    TotalStepBound {
        total_steps: usize,
        current_step: usize,
    },
}

impl LearningSchedule {
    pub fn total_step_bound(total_steps: usize) -> Self {
        Self::TotalStepBound {
            total_steps,
            current_step: 0,
        }
    }

    pub fn rollout_bound(total_rollouts: usize) -> Self {
        Self::RolloutBound {
            total_rollouts,
            current_rollout: 0,
        }
    }

    /// Advances the schedule and reports whether training is finished.
    pub fn advance(&mut self, rollout_steps: usize) -> bool {
        match self {
            Self::RolloutBound {
                total_rollouts,
                current_rollout,
            } => {
                *current_rollout += 1;
                current_rollout >= total_rollouts
            }
            Self::TotalStepBound {
                total_steps,
                current_step,
            } => {
                *current_step += rollout_steps;
                current_step >= total_steps
            }
        }
    }
}

pub trait OnPolicyAlgorithmHooks {
    fn init_hook(&mut self) -> bool {
        false
    }

    fn post_rollout_hook(&mut self, rollouts: &mut [RolloutBuffer], episode_returns: &[f32])
    -> bool;

    fn post_training_hook(&mut self) -> bool {
        false
    }

    fn shutdown_hook(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct DefaultOnPolicyAlgorithmHooks {
    rollout_idx: usize,
    learning_schedule: LearningSchedule,
    /// Average undiscounted return of the episodes finished during each rollout.
    pub average_returns: Vec<f32>,
}

impl DefaultOnPolicyAlgorithmHooks {
    pub fn new(learning_schedule: LearningSchedule) -> Self {
        Self {
            rollout_idx: 0,
            learning_schedule,
            average_returns: vec![],
        }
    }

    pub fn last_average_return(&self) -> Option<f32> {
        self.average_returns.last().copied()
    }
}

impl OnPolicyAlgorithmHooks for DefaultOnPolicyAlgorithmHooks {
    fn post_rollout_hook(
        &mut self,
        rollouts: &mut [RolloutBuffer],
        episode_returns: &[f32],
    ) -> bool {
        let total_reward = rollouts
            .iter()
            .map(|s| s.rewards.iter().sum::<f32>())
            .sum::<f32>();
        let episodes = episode_returns.len();
        if episodes > 0 {
            let average_return = episode_returns.iter().sum::<f32>() / episodes as f32;
            self.average_returns.push(average_return);
            info!(
                rollout = self.rollout_idx,
                episodes,
                total_reward,
                average_return,
                "rollout collected"
            );
        } else {
            info!(
                rollout = self.rollout_idx,
                total_reward, "rollout collected without finished episodes"
            );
        }
        self.rollout_idx += 1;
        let rollout_steps: usize = rollouts.iter().map(|e| e.actions.len()).sum();
        self.learning_schedule.advance(rollout_steps)
    }
}

pub struct OnPolicyAlgorithm<E: Env, A: OnPolicyAgent, H: OnPolicyAlgorithmHooks> {
    pub sampler: StepBoundSampler<E>,
    pub agent: A,
    pub hooks: H,
}

impl<E: Env, A: OnPolicyAgent, H: OnPolicyAlgorithmHooks> Algorithm
    for OnPolicyAlgorithm<E, A, H>
{
    fn train(&mut self) -> Result<()> {
        if self.hooks.init_hook() {
            return Ok(());
        }
        loop {
            // rollout phase
            let mut rollouts = self.sampler.collect_rollouts(self.agent.policy())?;
            let episode_returns = self.sampler.take_episode_returns();
            let stop = self
                .hooks
                .post_rollout_hook(&mut rollouts, &episode_returns);

            // learning phase
            self.agent.learn(rollouts)?;
            break_on_hook_res!(stop || self.hooks.post_training_hook());
        }
        self.hooks.shutdown_hook()
    }
}
