use crate::thread_safe_sequential::{ThreadSafeSequential, build_sequential};
use anyhow::{Result, ensure};
use candle_core::Tensor;
use candle_nn::{Module, VarBuilder};
use twinrl_core::policies::Policy;

/// Deterministic actor: an MLP whose output is squashed with `tanh` and scaled to
/// `[-max_action, max_action]`.
#[derive(Debug, Clone)]
pub struct DeterministicPolicy {
    net: ThreadSafeSequential,
    max_action: f32,
}

impl DeterministicPolicy {
    pub fn new(net: ThreadSafeSequential, max_action: f32) -> Self {
        Self { net, max_action }
    }

    pub fn build(
        observation_size: usize,
        hidden_sizes: &[usize],
        action_size: usize,
        max_action: f32,
        vb: &VarBuilder,
        prefix: &str,
    ) -> Result<Self> {
        let layers: Vec<usize> = hidden_sizes
            .iter()
            .copied()
            .chain(std::iter::once(action_size))
            .collect();
        let net = build_sequential(observation_size, &layers, vb, prefix)?;
        Ok(Self::new(net, max_action))
    }

    pub fn max_action(&self) -> f32 {
        self.max_action
    }

    /// Actions for a batch of observations `[B, obs_dim]`, keeping the graph.
    pub fn forward(&self, observations: &Tensor) -> Result<Tensor> {
        let pre_activation = self.net.forward(observations)?;
        Ok(pre_activation.tanh()?.affine(self.max_action as f64, 0.)?)
    }
}

impl Policy for DeterministicPolicy {
    fn get_action(&self, observation: &Tensor) -> Result<Tensor> {
        ensure!(
            observation.rank() == 1,
            "observation should be a flattened tensor"
        );
        let action = self.forward(&observation.unsqueeze(0)?)?.squeeze(0)?;
        Ok(action.detach())
    }
}
