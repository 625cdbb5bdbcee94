use anyhow::Result;
use candle_core::{Device, Tensor};
use twinrl_core::{
    Algorithm,
    env::{Env, EnvironmentDescription, SnapShot, Space},
    exploration::GaussianStrategy,
    off_policy_algorithm::{
        DefaultOffPolicyAlgorithmHooks, OffPolicyAgent, OffPolicyAlgorithm, OffPolicySchedule,
        OffPolicyStats,
    },
    on_policy_algorithm::{
        DefaultOnPolicyAlgorithmHooks, LearningSchedule, OnPolicyAgent, OnPolicyAlgorithm,
    },
    policies::Policy,
    replay_buffer::Transition,
    sampler::{EnvWorker, StepBoundSampler},
    utils::rollout_buffer::RolloutBuffer,
};

/// Counts steps, pays a reward of one per step and terminates after `horizon` steps.
struct CountingEnv {
    t: usize,
    horizon: usize,
}

impl CountingEnv {
    fn new(horizon: usize) -> Self {
        Self { t: 0, horizon }
    }

    fn observation(&self) -> Result<Tensor> {
        Ok(Tensor::new(&[self.t as f32], &Device::Cpu)?)
    }
}

impl Env for CountingEnv {
    fn reset(&mut self, _seed: u64) -> Result<Tensor> {
        self.t = 0;
        self.observation()
    }

    fn step(&mut self, _action: &Tensor) -> Result<SnapShot> {
        self.t += 1;
        Ok(SnapShot {
            state: self.observation()?,
            reward: 1.,
            terminated: self.t >= self.horizon,
            truncated: false,
        })
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(
            Space::continuous_from_dims(vec![1]),
            Space::bounded(vec![-1.], vec![1.]),
        )
    }
}

struct ZeroPolicy;

impl Policy for ZeroPolicy {
    fn get_action(&self, _observation: &Tensor) -> Result<Tensor> {
        Ok(Tensor::zeros(1, candle_core::DType::F32, &Device::Cpu)?)
    }
}

#[test]
fn max_path_length_truncates_without_terminating() -> Result<()> {
    let mut worker = EnvWorker::new(CountingEnv::new(100), Some(3));
    let mut steps = vec![];
    for _ in 0..3 {
        let action = ZeroPolicy.get_action(&worker.current_state()?)?;
        steps.push(worker.step(action)?);
    }
    let last = &steps[2];
    assert!(last.done);
    assert!(!last.terminated);
    assert_eq!(last.episode_return, Some(3.));
    assert!(worker.needs_reset());
    assert!(steps[..2].iter().all(|s| !s.done));
    Ok(())
}

#[test]
fn step_bound_sampler_restarts_finished_episodes() -> Result<()> {
    let envs = vec![CountingEnv::new(4), CountingEnv::new(4)];
    let mut sampler = StepBoundSampler::new(envs, 10, None);
    let rollouts = sampler.collect_rollouts(&ZeroPolicy)?;
    assert_eq!(rollouts.len(), 2);
    for rollout in rollouts.iter() {
        assert_eq!(rollout.len(), 10);
        assert_eq!(rollout.states.len(), 11);
        assert_eq!(rollout.dones.iter().filter(|d| **d).count(), 2);
    }
    // two finished episodes per environment
    assert_eq!(sampler.take_episode_returns(), vec![4., 4., 4., 4.]);
    assert!(sampler.take_episode_returns().is_empty());
    Ok(())
}

struct CountingOnPolicyAgent {
    learned_steps: usize,
}

impl OnPolicyAgent for CountingOnPolicyAgent {
    type Policy = ZeroPolicy;

    fn policy(&self) -> &Self::Policy {
        &ZeroPolicy
    }

    fn learn(&mut self, rollouts: Vec<RolloutBuffer>) -> Result<()> {
        self.learned_steps += rollouts.iter().map(|r| r.len()).sum::<usize>();
        Ok(())
    }
}

#[test]
fn on_policy_runner_follows_the_schedule() -> Result<()> {
    let mut algorithm = OnPolicyAlgorithm {
        sampler: StepBoundSampler::new(vec![CountingEnv::new(5)], 8, None),
        agent: CountingOnPolicyAgent { learned_steps: 0 },
        hooks: DefaultOnPolicyAlgorithmHooks::new(LearningSchedule::total_step_bound(24)),
    };
    algorithm.train()?;
    assert_eq!(algorithm.agent.learned_steps, 24);
    assert_eq!(algorithm.hooks.last_average_return(), Some(5.));
    Ok(())
}

#[derive(Default)]
struct RecordingOffPolicyAgent {
    stored: Vec<Transition>,
    itrs: Vec<usize>,
}

impl OffPolicyAgent for RecordingOffPolicyAgent {
    type Policy = ZeroPolicy;

    fn policy(&self) -> &Self::Policy {
        &ZeroPolicy
    }

    fn store_transition(&mut self, transition: Transition) -> Result<()> {
        self.stored.push(transition);
        Ok(())
    }

    fn ready_to_train(&self) -> bool {
        self.stored.len() >= 10
    }

    fn train_step(&mut self, itr: usize, samples_data: &[Transition]) -> Result<OffPolicyStats> {
        assert_eq!(samples_data.len(), 5);
        self.itrs.push(itr);
        Ok(OffPolicyStats {
            qval_loss: 1.,
            action_loss: (itr % 2 == 0).then_some(-1.),
            mean_qval: 0.,
            mean_target: 0.,
        })
    }
}

#[test]
fn off_policy_runner_trains_once_the_agent_is_ready() -> Result<()> {
    let env = CountingEnv::new(4);
    let exploration = GaussianStrategy::constant(&env.env_description().action_space, 0.1)?;
    let schedule = OffPolicySchedule {
        n_epochs: 2,
        n_epoch_cycles: 2,
        env_steps_per_cycle: 5,
        n_train_steps: 3,
    };
    let mut algorithm = OffPolicyAlgorithm::new(
        EnvWorker::new(env, None),
        RecordingOffPolicyAgent::default(),
        Box::new(exploration),
        schedule,
        DefaultOffPolicyAlgorithmHooks::default(),
    );
    algorithm.train()?;
    assert_eq!(algorithm.env_steps(), 20);
    assert_eq!(algorithm.agent.stored.len(), 20);
    // the first cycle only fills the buffer
    assert_eq!(algorithm.agent.itrs, (0..9).collect::<Vec<_>>());
    assert_eq!(algorithm.train_steps(), 9);
    // every fourth transition ends the episode
    let terminals = algorithm.agent.stored.iter().filter(|t| t.terminal).count();
    assert_eq!(terminals, 5);
    assert_eq!(algorithm.hooks.average_returns, vec![4., 4.]);
    Ok(())
}
