use crate::thread_safe_sequential::{ThreadSafeSequential, build_sequential};
use anyhow::{Result, ensure};
use candle_core::{Device, Tensor};
use candle_nn::{Init, Module, VarBuilder};
use std::f32;
use twinrl_core::{
    policies::{Policy, StochasticPolicy},
    rng::standard_normal,
};

/// Gaussian with a state dependent mean and a learned, state independent diagonal log standard
/// deviation.
#[derive(Debug, Clone)]
pub struct DiagGaussianDistribution {
    mu_net: ThreadSafeSequential,
    log_std: Tensor,
}

impl DiagGaussianDistribution {
    pub fn new(mu_net: ThreadSafeSequential, log_std: Tensor) -> Self {
        Self { mu_net, log_std }
    }

    /// `layers` ends with the action size. `log_std` is registered as `{prefix}log_std` so that it
    /// is trained together with the mean network.
    pub fn build(
        input_dim: usize,
        layers: &[usize],
        vb: &VarBuilder,
        init_std: f32,
        prefix: &str,
    ) -> Result<Self> {
        let action_size = *layers
            .last()
            .ok_or_else(|| anyhow::anyhow!("the mean network needs at least one layer"))?;
        let mu_net = build_sequential(input_dim, layers, vb, prefix)?;
        let log_std = vb.get_with_hints(
            action_size,
            &format!("{prefix}log_std"),
            Init::Const(init_std.ln() as f64),
        )?;
        Ok(Self { mu_net, log_std })
    }

    pub fn mean(&self, observations: &Tensor) -> Result<Tensor> {
        Ok(self.mu_net.forward(observations)?)
    }

    fn device(&self) -> &Device {
        self.log_std.device()
    }
}

impl Policy for DiagGaussianDistribution {
    fn get_action(&self, observation: &Tensor) -> Result<Tensor> {
        ensure!(
            observation.rank() == 1,
            "observation should be a flattened tensor"
        );
        let mu = self.mu_net.forward(&observation.unsqueeze(0)?)?.squeeze(0)?;
        let noise: Vec<f32> = (0..mu.elem_count()).map(|_| standard_normal()).collect();
        let noise = Tensor::from_vec(noise, mu.shape(), self.device())?;
        let std = self.log_std.exp()?;
        Ok((mu + std.mul(&noise)?)?.detach())
    }

    fn get_deterministic_action(&self, observation: &Tensor) -> Result<Tensor> {
        let mu = self.mu_net.forward(&observation.unsqueeze(0)?)?.squeeze(0)?;
        Ok(mu.detach())
    }
}

impl StochasticPolicy for DiagGaussianDistribution {
    fn log_probs(&self, observations: &Tensor, actions: &Tensor) -> Result<Tensor> {
        let mu = self.mu_net.forward(observations)?;
        let log_std = self.log_std.broadcast_as(mu.shape())?;
        let var = log_std.exp()?.sqr()?;
        let log_sqrt_2pi = f32::ln(f32::sqrt(2f32 * f32::consts::PI)) as f64;
        let log_probs = (actions - &mu)?
            .sqr()?
            .div(&var.affine(2., 0.)?)?
            .neg()?
            .sub(&log_std)?
            .affine(1., -log_sqrt_2pi)?;
        Ok(log_probs.sum(1)?)
    }

    fn entropy(&self) -> Result<Tensor> {
        let half_log_2pi_e = 0.5 * ((2. * f32::consts::PI).ln() + 1.);
        let entropy = self
            .log_std
            .affine(1., half_log_2pi_e as f64)?
            .sum_all()?;
        Ok(entropy)
    }

    fn std(&self) -> Result<f32> {
        Ok(self.log_std.exp()?.mean_all()?.to_scalar::<f32>()?)
    }
}
