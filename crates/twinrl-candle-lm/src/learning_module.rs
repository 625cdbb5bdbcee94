use crate::{optimizer::OptimizerWithMaxGrad, thread_safe_sequential::ThreadSafeSequential};
use anyhow::Result;
use candle_core::Tensor;
use candle_nn::Module;
use twinrl_core::{
    policies::{LearningModule, ValueFunction},
    tensors::{PolicyLoss, ValueLoss},
};

pub struct PolicyValuesLosses {
    pub policy_loss: PolicyLoss,
    pub value_loss: ValueLoss,
}

#[derive(Debug, Clone)]
pub struct SequentialValueFunction {
    pub value_net: ThreadSafeSequential,
}

impl ValueFunction for SequentialValueFunction {
    fn calculate_values(&self, observations: &Tensor) -> Result<Tensor> {
        Ok(self.value_net.forward(observations)?.squeeze(1)?)
    }
}

/// The policy and the value function have separate optimizers.
#[derive(Debug)]
pub struct DecoupledActorCriticLM {
    pub value_function: SequentialValueFunction,
    pub policy_optimizer_with_grad: OptimizerWithMaxGrad,
    pub value_optimizer_with_grad: OptimizerWithMaxGrad,
}

impl LearningModule for DecoupledActorCriticLM {
    type Losses = PolicyValuesLosses;

    fn update(&mut self, losses: Self::Losses) -> Result<()> {
        self.policy_optimizer_with_grad
            .backward_step(&losses.policy_loss)?;
        self.value_optimizer_with_grad
            .backward_step(&losses.value_loss)?;
        Ok(())
    }
}

/// The policy and the value function share one optimizer, the losses are summed.
#[derive(Debug)]
pub struct ParalellActorCriticLM {
    pub value_function: SequentialValueFunction,
    pub optimizer_with_grad: OptimizerWithMaxGrad,
    pub vf_coeff: f32,
}

impl LearningModule for ParalellActorCriticLM {
    type Losses = PolicyValuesLosses;

    fn update(&mut self, losses: Self::Losses) -> Result<()> {
        let value_loss = losses.value_loss.affine(self.vf_coeff as f64, 0.)?;
        let loss = losses.policy_loss.add(&value_loss)?;
        self.optimizer_with_grad.backward_step(&loss)
    }
}

#[derive(Debug)]
pub enum LearningModuleKind {
    Decoupled(DecoupledActorCriticLM),
    Paralell(ParalellActorCriticLM),
}

impl LearningModuleKind {
    pub fn policy_learning_rate(&self) -> f64 {
        match self {
            Self::Decoupled(lm) => lm.policy_optimizer_with_grad.learning_rate(),
            Self::Paralell(lm) => lm.optimizer_with_grad.learning_rate(),
        }
    }

    fn value_function(&self) -> &SequentialValueFunction {
        match self {
            Self::Decoupled(lm) => &lm.value_function,
            Self::Paralell(lm) => &lm.value_function,
        }
    }
}

impl LearningModule for LearningModuleKind {
    type Losses = PolicyValuesLosses;

    fn update(&mut self, losses: Self::Losses) -> Result<()> {
        match self {
            Self::Decoupled(lm) => lm.update(losses),
            Self::Paralell(lm) => lm.update(losses),
        }
    }
}

impl ValueFunction for LearningModuleKind {
    fn calculate_values(&self, observations: &Tensor) -> Result<Tensor> {
        self.value_function().calculate_values(observations)
    }
}
