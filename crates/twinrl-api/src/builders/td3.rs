use crate::builders::exploration::ExplorationConfig;
use anyhow::Result;
use candle_core::Device;
use serde::{Deserialize, Serialize};
use twinrl_agents::td3::{Td3, Td3Params};
use twinrl_candle_lm::{
    continuous_policy::DeterministicPolicy, q_function::ContinuousMlpQFunction,
    target_network::NetworkPair,
};
use twinrl_core::{
    env::{Env, EnvironmentDescription},
    error::TwinRlError,
    off_policy_algorithm::{DefaultOffPolicyAlgorithmHooks, OffPolicyAlgorithm, OffPolicySchedule},
    replay_buffer::UniformReplayBuffer,
    sampler::EnvWorker,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Td3Builder {
    pub params: Td3Params,
    pub policy_layers: Vec<usize>,
    pub qf_layers: Vec<usize>,
    pub replay_capacity: usize,
    /// Size of the goals stored with each transition, the networks take `obs + goal` inputs
    /// when `params.input_include_goal` is set.
    pub goal_dim: usize,
    pub exploration: ExplorationConfig,
    pub schedule: OffPolicySchedule,
}

impl Default for Td3Builder {
    fn default() -> Self {
        Self {
            params: Td3Params::default(),
            policy_layers: vec![64, 64],
            qf_layers: vec![64, 64],
            replay_capacity: 1_000_000,
            goal_dim: 0,
            exploration: ExplorationConfig::default(),
            schedule: OffPolicySchedule::default(),
        }
    }
}

impl Td3Builder {
    pub fn build_agent(
        &self,
        device: &Device,
        env_description: &EnvironmentDescription,
    ) -> Result<Td3> {
        if self.params.input_include_goal && self.goal_dim == 0 {
            return Err(
                TwinRlError::InvalidConfig("input_include_goal needs a goal_dim".into()).into(),
            );
        }
        let input_size = if self.params.input_include_goal {
            env_description.observation_size() + self.goal_dim
        } else {
            env_description.observation_size()
        };
        let action_size = env_description.action_size();
        let max_action = env_description.action_space.max_abs_bound().ok_or_else(|| {
            TwinRlError::InvalidConfig("td3 needs a bounded continuous action space".into())
        })?;
        let policy = NetworkPair::build(device, |vb| {
            DeterministicPolicy::build(
                input_size,
                &self.policy_layers,
                action_size,
                max_action,
                vb,
                "policy",
            )
        })?;
        let qf = || {
            NetworkPair::build(device, |vb| {
                ContinuousMlpQFunction::build(input_size, action_size, &self.qf_layers, vb, "qf")
            })
        };
        let replay_buffer = UniformReplayBuffer::goal_conditioned(
            self.replay_capacity,
            env_description.observation_size(),
            self.goal_dim,
            action_size,
            device.clone(),
        )?;
        Td3::new(
            self.params.clone(),
            policy,
            qf()?,
            qf()?,
            replay_buffer,
            device.clone(),
        )
    }

    /// Time limits are left to the environment.
    pub fn build<E: Env>(
        &self,
        env: E,
        device: &Device,
    ) -> Result<OffPolicyAlgorithm<E, Td3, DefaultOffPolicyAlgorithmHooks>> {
        if self.goal_dim > 0 {
            return Err(TwinRlError::InvalidConfig(
                "environments report no goals, goal-conditioned agents are built with build_agent"
                    .into(),
            )
            .into());
        }
        let env_description = env.env_description();
        let agent = self.build_agent(device, &env_description)?;
        let exploration = self.exploration.build(&env_description.action_space)?;
        Ok(OffPolicyAlgorithm::new(
            EnvWorker::new(env, None),
            agent,
            exploration,
            self.schedule,
            DefaultOffPolicyAlgorithmHooks::default(),
        ))
    }
}
