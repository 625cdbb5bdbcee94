use anyhow::Result;
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use tracing::{debug, info};
use twinrl_candle_lm::{
    learning_module::{LearningModuleKind, PolicyValuesLosses},
    rollout_batch::{RolloutBatch, RolloutBatchIterator},
};
use twinrl_core::{
    error::{TwinRlError, ensure_finite},
    on_policy_algorithm::OnPolicyAgent,
    policies::{LearningModule, StochasticPolicy, ValueFunction},
    tensors::{Logp, LogpDiff, PolicyLoss, ValueLoss, ValuesPred},
    utils::rollout_buffer::{Logps, RolloutBuffer, calculate_advantages_and_returns},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntropyMethod {
    /// Entropy plays no part in the objective.
    #[default]
    NoEntropy,
    /// `policy_ent_coeff · entropy` is subtracted from the policy loss.
    Regularized,
    /// Maximum entropy RL, `policy_ent_coeff · entropy` is added to every reward before the
    /// advantages are estimated.
    Max,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PpoParams {
    pub lr_clip_range: f32,
    pub discount: f32,
    pub gae_lambda: f32,
    /// Minibatch size.
    pub sample_size: usize,
    /// Passes over the collected data per call to `learn`.
    pub max_epochs: usize,
    pub center_adv: bool,
    pub entropy_method: EntropyMethod,
    pub policy_ent_coeff: f32,
    pub stop_entropy_gradient: bool,
    /// Estimate the entropy with the negative log likelihood of the taken actions instead of the
    /// closed form entropy of the policy.
    pub use_neg_logli_entropy: bool,
    /// Stop the epoch loop early once the approximate KL divergence exceeds `1.5 · target_kl`.
    pub target_kl: Option<f32>,
}

impl Default for PpoParams {
    fn default() -> Self {
        Self {
            lr_clip_range: 0.2,
            discount: 0.99,
            gae_lambda: 0.95,
            sample_size: 64,
            max_epochs: 10,
            center_adv: true,
            entropy_method: EntropyMethod::NoEntropy,
            policy_ent_coeff: 0.,
            stop_entropy_gradient: false,
            use_neg_logli_entropy: false,
            target_kl: None,
        }
    }
}

impl PpoParams {
    pub fn validate(&self) -> Result<(), TwinRlError> {
        let invalid = |msg: &str| Err(TwinRlError::InvalidConfig(msg.to_owned()));
        match self.entropy_method {
            EntropyMethod::Max if self.center_adv => {
                invalid("centering advantages is incompatible with the max entropy method")
            }
            EntropyMethod::Max if !self.stop_entropy_gradient => {
                invalid("the max entropy method needs stop_entropy_gradient")
            }
            EntropyMethod::NoEntropy if self.policy_ent_coeff != 0. => {
                invalid("policy_ent_coeff is set but the entropy method is no_entropy")
            }
            _ if self.sample_size == 0 || self.max_epochs == 0 => {
                invalid("sample_size and max_epochs must be at least 1")
            }
            _ => Ok(()),
        }
    }
}

/// Averages over every minibatch of one call to `learn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PpoStats {
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub approx_kl: f32,
    pub clip_fraction: f32,
    pub epochs: usize,
}

pub struct PpoBatchData {
    pub logp: Logp,
    pub values_pred: ValuesPred,
    pub logp_diff: LogpDiff,
    pub ratio: Tensor,
}

pub enum HookResult {
    Continue,
    Break,
}

pub trait PpoHooks {
    fn batch_hook(
        &mut self,
        _rollout_batch: &RolloutBatch,
        _policy_loss: &mut PolicyLoss,
        _value_loss: &mut ValueLoss,
        _data: &PpoBatchData,
    ) -> Result<HookResult> {
        Ok(HookResult::Continue)
    }

    fn epoch_hook(&mut self, _epoch: usize, _stats: &PpoStats) -> Result<HookResult> {
        Ok(HookResult::Continue)
    }
}

pub struct EmptyPpoHooks;

impl PpoHooks for EmptyPpoHooks {}

pub trait PpoLearningModule:
    LearningModule<Losses = PolicyValuesLosses> + ValueFunction
{
}

impl PpoLearningModule for LearningModuleKind {}

/// `-mean(min(r·A, clip(r, 1 − ε, 1 + ε)·A))`
pub fn clipped_surrogate_loss(
    ratio: &Tensor,
    advantages: &Tensor,
    clip_range: f32,
) -> Result<Tensor> {
    let unclipped = (ratio * advantages)?;
    let clipped = (ratio.clamp(1. - clip_range, 1. + clip_range)? * advantages)?;
    Ok(unclipped.minimum(&clipped)?.mean_all()?.neg()?)
}

pub struct Ppo<P: StochasticPolicy, LM: PpoLearningModule> {
    pub policy: P,
    pub learning_module: LM,
    pub params: PpoParams,
    pub hooks: Box<dyn PpoHooks>,
    pub device: Device,
    last_stats: Option<PpoStats>,
}

impl<P: StochasticPolicy, LM: PpoLearningModule> Ppo<P, LM> {
    pub fn new(policy: P, learning_module: LM, params: PpoParams, device: Device) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            policy,
            learning_module,
            params,
            hooks: Box::new(EmptyPpoHooks),
            device,
            last_stats: None,
        })
    }

    pub fn with_hooks(mut self, hooks: Box<dyn PpoHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn last_stats(&self) -> Option<PpoStats> {
        self.last_stats
    }

    /// Per step entropy estimates of a rollout, without gradients.
    fn rollout_entropy(&self, rollout: &RolloutBuffer) -> Result<Vec<f32>> {
        if self.params.use_neg_logli_entropy {
            let logps = self
                .policy
                .log_probs(&rollout.stacked_states()?, &rollout.stacked_actions()?)?;
            Ok(logps.neg()?.detach().to_vec1()?)
        } else {
            let entropy = self.policy.entropy()?.to_scalar::<f32>()?;
            Ok(vec![entropy; rollout.len()])
        }
    }

    fn batch_entropy(&self, logp: &Logp) -> Result<Tensor> {
        let entropy = if self.params.use_neg_logli_entropy {
            logp.neg()?.mean_all()?
        } else {
            self.policy.entropy()?
        };
        if self.params.stop_entropy_gradient {
            Ok(entropy.detach())
        } else {
            Ok(entropy)
        }
    }

    fn batching_loop(
        &mut self,
        batch_iter: &mut RolloutBatchIterator,
        stats: &mut Vec<[f32; 5]>,
    ) -> Result<HookResult> {
        for batch in batch_iter {
            let batch = batch?;
            let logp = Logp(
                self.policy
                    .log_probs(&batch.observations, &batch.actions)?,
            );
            let values_pred =
                ValuesPred(self.learning_module.calculate_values(&batch.observations)?);
            let mut value_loss = ValueLoss(batch.returns.sub(&values_pred)?.sqr()?.mean_all()?);
            let logp_diff = LogpDiff((logp.deref() - &batch.logp_old)?);
            let ratio = logp_diff.exp()?;
            let mut policy_loss = PolicyLoss(clipped_surrogate_loss(
                &ratio,
                &batch.advantages,
                self.params.lr_clip_range,
            )?);
            let entropy = self.batch_entropy(&logp)?;
            if self.params.entropy_method == EntropyMethod::Regularized {
                let entropy_bonus = entropy.affine(self.params.policy_ent_coeff as f64, 0.)?;
                policy_loss = PolicyLoss(policy_loss.sub(&entropy_bonus)?);
            }

            let approx_kl = logp_diff.neg()?.mean_all()?.to_scalar::<f32>()?;
            let clip_fraction = ratio
                .affine(1., -1.)?
                .abs()?
                .gt(self.params.lr_clip_range as f64)?
                .to_dtype(candle_core::DType::F32)?
                .mean_all()?
                .to_scalar::<f32>()?;
            stats.push([
                ensure_finite("policy_loss", policy_loss.to_scalar::<f32>()?)?,
                ensure_finite("value_loss", value_loss.to_scalar::<f32>()?)?,
                entropy.to_scalar::<f32>()?,
                approx_kl,
                clip_fraction,
            ]);

            let data = PpoBatchData {
                logp,
                values_pred,
                logp_diff,
                ratio,
            };
            let hook_result =
                self.hooks
                    .batch_hook(&batch, &mut policy_loss, &mut value_loss, &data)?;
            self.learning_module.update(PolicyValuesLosses {
                policy_loss,
                value_loss,
            })?;
            if let HookResult::Break = hook_result {
                return Ok(HookResult::Break);
            }
        }
        Ok(HookResult::Continue)
    }
}

fn average(stats: &[[f32; 5]], epochs: usize) -> PpoStats {
    let n = stats.len().max(1) as f32;
    let sum = stats.iter().fold([0f32; 5], |mut acc, s| {
        for (a, v) in acc.iter_mut().zip(s) {
            *a += v;
        }
        acc
    });
    PpoStats {
        policy_loss: sum[0] / n,
        value_loss: sum[1] / n,
        entropy: sum[2] / n,
        approx_kl: sum[3] / n,
        clip_fraction: sum[4] / n,
        epochs,
    }
}

impl<P: StochasticPolicy, LM: PpoLearningModule> OnPolicyAgent for Ppo<P, LM> {
    type Policy = P;

    fn policy(&self) -> &Self::Policy {
        &self.policy
    }

    fn learn(&mut self, mut rollouts: Vec<RolloutBuffer>) -> Result<()> {
        if self.params.entropy_method == EntropyMethod::Max {
            let coeff = self.params.policy_ent_coeff;
            for rollout in rollouts.iter_mut() {
                let entropy = self.rollout_entropy(rollout)?;
                for (reward, ent) in rollout.rewards.iter_mut().zip(entropy) {
                    *reward += coeff * ent;
                }
            }
        }
        let (mut advantages, returns) = calculate_advantages_and_returns(
            &rollouts,
            &self.learning_module,
            self.params.discount,
            self.params.gae_lambda,
        )?;
        if self.params.center_adv {
            advantages.normalize();
        }
        let logps = Logps(
            rollouts
                .iter()
                .map(|rollout| {
                    let logp = self
                        .policy
                        .log_probs(&rollout.stacked_states()?, &rollout.stacked_actions()?)?;
                    Ok(logp.detach().to_vec1()?)
                })
                .collect::<Result<Vec<Vec<f32>>>>()?,
        );

        let mut stats = vec![];
        let mut epochs = 0;
        for epoch in 0..self.params.max_epochs {
            let mut batch_iter = RolloutBatchIterator::new(
                &rollouts,
                &advantages,
                &returns,
                &logps,
                self.params.sample_size,
                self.device.clone(),
            );
            let epoch_start = stats.len();
            let batch_result = self.batching_loop(&mut batch_iter, &mut stats)?;
            epochs = epoch + 1;
            // the early stop looks at this epoch alone, the reported stats cover every epoch
            let epoch_stats = average(&stats[epoch_start..], epochs);
            debug!(
                epoch,
                approx_kl = epoch_stats.approx_kl,
                policy_loss = epoch_stats.policy_loss,
                "ppo epoch"
            );
            if let HookResult::Break = batch_result {
                break;
            }
            if let HookResult::Break = self.hooks.epoch_hook(epoch, &epoch_stats)? {
                break;
            }
            if self
                .params
                .target_kl
                .is_some_and(|target_kl| epoch_stats.approx_kl > 1.5 * target_kl)
            {
                break;
            }
        }
        let stats = average(&stats, epochs);
        info!(
            policy_loss = stats.policy_loss,
            value_loss = stats.value_loss,
            entropy = stats.entropy,
            approx_kl = stats.approx_kl,
            clip_fraction = stats.clip_fraction,
            std = self.policy.std()?,
            epochs = stats.epochs,
            "ppo update"
        );
        self.last_stats = Some(stats);
        Ok(())
    }
}
