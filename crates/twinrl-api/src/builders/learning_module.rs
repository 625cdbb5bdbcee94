use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use twinrl_candle_lm::{
    learning_module::{
        DecoupledActorCriticLM, LearningModuleKind, ParalellActorCriticLM, SequentialValueFunction,
    },
    optimizer::OptimizerWithMaxGrad,
    thread_safe_sequential::build_sequential,
};
use twinrl_core::env::EnvironmentDescription;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LearningModuleType {
    /// One optimizer over the policy and the value function, `vf_coeff` weighs the value loss.
    Paralell {
        value_layers: Vec<usize>,
        learning_rate: f64,
        vf_coeff: f32,
        max_grad_norm: Option<f32>,
    },
    Decoupled {
        value_layers: Vec<usize>,
        policy_learning_rate: f64,
        value_learning_rate: f64,
        policy_max_grad_norm: Option<f32>,
        value_max_grad_norm: Option<f32>,
    },
}

impl Default for LearningModuleType {
    fn default() -> Self {
        Self::Decoupled {
            value_layers: vec![32, 32],
            policy_learning_rate: 3e-4,
            value_learning_rate: 3e-4,
            policy_max_grad_norm: None,
            value_max_grad_norm: None,
        }
    }
}

impl LearningModuleType {
    /// `policy_varmap` holds the policy variables, in the parallel case the value network is
    /// registered into it as well so that one optimizer covers both.
    pub fn build(
        &self,
        policy_varmap: VarMap,
        env_description: &EnvironmentDescription,
        device: &Device,
    ) -> Result<LearningModuleKind> {
        let input_size = env_description.observation_size();
        match self {
            Self::Paralell {
                value_layers,
                learning_rate,
                vf_coeff,
                max_grad_norm,
            } => {
                let vb = VarBuilder::from_varmap(&policy_varmap, DType::F32, device);
                let value_layers = &[&value_layers[..], &[1]].concat();
                let value_net = build_sequential(input_size, value_layers, &vb, "value")?;
                let optimizer_with_grad =
                    OptimizerWithMaxGrad::adam(policy_varmap, *learning_rate, *max_grad_norm)?;
                Ok(LearningModuleKind::Paralell(ParalellActorCriticLM {
                    value_function: SequentialValueFunction { value_net },
                    optimizer_with_grad,
                    vf_coeff: *vf_coeff,
                }))
            }
            Self::Decoupled {
                value_layers,
                policy_learning_rate,
                value_learning_rate,
                policy_max_grad_norm,
                value_max_grad_norm,
            } => {
                let critic_varmap = VarMap::new();
                let critic_vb = VarBuilder::from_varmap(&critic_varmap, DType::F32, device);
                let value_layers = &[&value_layers[..], &[1]].concat();
                let value_net = build_sequential(input_size, value_layers, &critic_vb, "value")?;
                let policy_optimizer_with_grad = OptimizerWithMaxGrad::adam(
                    policy_varmap,
                    *policy_learning_rate,
                    *policy_max_grad_norm,
                )?;
                let value_optimizer_with_grad = OptimizerWithMaxGrad::adam(
                    critic_varmap,
                    *value_learning_rate,
                    *value_max_grad_norm,
                )?;
                Ok(LearningModuleKind::Decoupled(DecoupledActorCriticLM {
                    value_function: SequentialValueFunction { value_net },
                    policy_optimizer_with_grad,
                    value_optimizer_with_grad,
                }))
            }
        }
    }
}
