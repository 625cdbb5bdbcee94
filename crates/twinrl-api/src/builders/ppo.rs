use crate::builders::learning_module::LearningModuleType;
use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use twinrl_agents::ppo::{Ppo, PpoParams};
use twinrl_candle_lm::{
    distributions::DiagGaussianDistribution, learning_module::LearningModuleKind,
};
use twinrl_core::{
    env::{EnvBuilderTrait, EnvironmentDescription},
    error::TwinRlError,
    on_policy_algorithm::{DefaultOnPolicyAlgorithmHooks, LearningSchedule, OnPolicyAlgorithm},
    sampler::StepBoundSampler,
};

pub type CandlePpo = Ppo<DiagGaussianDistribution, LearningModuleKind>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PpoBuilder {
    pub params: PpoParams,
    pub policy_layers: Vec<usize>,
    pub init_std: f32,
    pub learning_module: LearningModuleType,
    /// Steps collected from every environment per rollout.
    pub n_steps: usize,
    pub n_envs: usize,
    pub total_steps: usize,
}

impl Default for PpoBuilder {
    fn default() -> Self {
        Self {
            params: PpoParams::default(),
            policy_layers: vec![32, 32],
            init_std: 1.,
            learning_module: LearningModuleType::default(),
            n_steps: 2048,
            n_envs: 1,
            total_steps: 1_000_000,
        }
    }
}

impl PpoBuilder {
    pub fn build_agent(
        &self,
        device: &Device,
        env_description: &EnvironmentDescription,
    ) -> Result<CandlePpo> {
        let policy_varmap = VarMap::new();
        let policy_vb = VarBuilder::from_varmap(&policy_varmap, DType::F32, device);
        let layers = [&self.policy_layers[..], &[env_description.action_size()]].concat();
        let policy = DiagGaussianDistribution::build(
            env_description.observation_size(),
            &layers,
            &policy_vb,
            self.init_std,
            "policy",
        )?;
        let learning_module =
            self.learning_module
                .build(policy_varmap, env_description, device)?;
        Ppo::new(policy, learning_module, self.params.clone(), device.clone())
    }

    pub fn build<EB: EnvBuilderTrait>(
        &self,
        env_builder: EB,
        device: &Device,
    ) -> Result<OnPolicyAlgorithm<EB::Env, CandlePpo, DefaultOnPolicyAlgorithmHooks>> {
        if self.n_envs == 0 || self.n_steps == 0 {
            return Err(
                TwinRlError::InvalidConfig("n_envs and n_steps must be at least 1".into()).into(),
            );
        }
        let envs = (0..self.n_envs)
            .map(|_| env_builder.build_env())
            .collect::<Result<Vec<_>>>()?;
        let sampler = StepBoundSampler::new(envs, self.n_steps, None);
        let env_description = sampler.env_description().ok_or_else(|| {
            TwinRlError::InvalidConfig("the sampler has no environments".into())
        })?;
        let agent = self.build_agent(device, &env_description)?;
        let hooks =
            DefaultOnPolicyAlgorithmHooks::new(LearningSchedule::total_step_bound(self.total_steps));
        Ok(OnPolicyAlgorithm {
            sampler,
            agent,
            hooks,
        })
    }
}
