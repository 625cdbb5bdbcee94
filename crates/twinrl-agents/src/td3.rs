//! Twin Delayed Deep Deterministic policy gradient.
//!
//! Every call to [`Td3::optimize_policy`] samples a batch from the replay buffer, forms the
//! clipped TD(0) targets with the minimum of the two target critics, regresses both critics onto
//! these targets and, every `policy_delay` steps, updates the actor against `min(Q1, Q2)` and
//! moves all target networks toward their online counterparts.

use anyhow::Result;
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use twinrl_candle_lm::{
    continuous_policy::DeterministicPolicy,
    optimizer::OptimizerWithMaxGrad,
    q_function::ContinuousMlpQFunction,
    regularization::with_weight_decay,
    target_network::NetworkPair,
};
use twinrl_core::{
    error::{TwinRlError, ensure_finite},
    off_policy_algorithm::{OffPolicyAgent, OffPolicyStats},
    replay_buffer::{ReplayBuffer, Transition, TransitionBatch, UniformReplayBuffer},
    rng::standard_normal,
    tensors::{ActionLoss, QvalLoss, Targets},
};

/// Gaussian noise added to the target policy's actions before they are scored by the target
/// critics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TargetPolicyNoise {
    pub sigma: f32,
    pub noise_clip: f32,
}

impl Default for TargetPolicyNoise {
    fn default() -> Self {
        Self {
            sigma: 0.2,
            noise_clip: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Td3Params {
    pub policy_lr: f64,
    pub qf_lr: f64,
    pub target_update_tau: f32,
    pub discount: f32,
    /// Targets are clipped to `[-clip_return, clip_return]`, `None` leaves them unbounded.
    pub clip_return: Option<f32>,
    /// Clip the upper end of the targets at zero, for tasks with non positive rewards.
    pub clip_pos_returns: bool,
    pub policy_weight_decay: f32,
    pub qf_weight_decay: f32,
    /// The actor and the targets are updated on iterations divisible by `policy_delay`.
    pub policy_delay: usize,
    pub buffer_batch_size: usize,
    pub min_buffer_size: usize,
    pub reward_scale: f32,
    pub max_grad_norm: Option<f32>,
    pub target_policy_noise: Option<TargetPolicyNoise>,
    /// Append the sampled goal to observations before they reach the actor and the critics.
    pub input_include_goal: bool,
}

impl Default for Td3Params {
    fn default() -> Self {
        Self {
            policy_lr: 1e-4,
            qf_lr: 1e-3,
            target_update_tau: 0.01,
            discount: 0.99,
            clip_return: None,
            clip_pos_returns: false,
            policy_weight_decay: 0.,
            qf_weight_decay: 0.,
            policy_delay: 2,
            buffer_batch_size: 64,
            min_buffer_size: 10_000,
            reward_scale: 1.,
            max_grad_norm: None,
            target_policy_noise: None,
            input_include_goal: false,
        }
    }
}

impl Td3Params {
    /// Lower and upper bound of the targets.
    pub fn clip_range(&self) -> (f32, f32) {
        let clip_return = self.clip_return.unwrap_or(f32::INFINITY);
        let upper = if self.clip_pos_returns {
            0.
        } else {
            clip_return
        };
        (-clip_return, upper)
    }

    pub fn validate(&self) -> Result<(), TwinRlError> {
        let invalid = |msg: String| Err(TwinRlError::InvalidConfig(msg));
        if !(0. ..=1.).contains(&self.target_update_tau) {
            return invalid(format!(
                "target_update_tau {} is outside [0, 1]",
                self.target_update_tau
            ));
        }
        if !(0. ..=1.).contains(&self.discount) {
            return invalid(format!("discount {} is outside [0, 1]", self.discount));
        }
        if self.policy_delay == 0 {
            return invalid("policy_delay must be at least 1".into());
        }
        if self.buffer_batch_size == 0 {
            return invalid("buffer_batch_size must be at least 1".into());
        }
        if self.clip_return.is_some_and(|c| c.is_nan() || c < 0.) {
            return invalid(format!("clip_return {:?} must be non negative", self.clip_return));
        }
        Ok(())
    }
}

/// What one training step reports back to the runner.
#[derive(Debug, Clone)]
pub struct Td3Losses {
    /// The lower of the two critic losses.
    pub qval_loss: f32,
    pub targets: Targets,
    /// Q-values of the critic with the lower loss, `[B, 1]`.
    pub qval: Tensor,
    /// Only present on steps that updated the actor.
    pub action_loss: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct CriticLosses {
    pub qf1_loss: f32,
    pub qf2_loss: f32,
    pub qval1: Tensor,
    pub qval2: Tensor,
}

pub struct Td3<R: ReplayBuffer = UniformReplayBuffer> {
    params: Td3Params,
    policy: NetworkPair<DeterministicPolicy>,
    qf1: NetworkPair<ContinuousMlpQFunction>,
    qf2: NetworkPair<ContinuousMlpQFunction>,
    policy_optimizer: OptimizerWithMaxGrad,
    qf1_optimizer: OptimizerWithMaxGrad,
    qf2_optimizer: OptimizerWithMaxGrad,
    replay_buffer: R,
    device: Device,
}

impl<R: ReplayBuffer> Td3<R> {
    /// The target networks inside the pairs already start as hard copies of the online ones.
    pub fn new(
        params: Td3Params,
        policy: NetworkPair<DeterministicPolicy>,
        qf1: NetworkPair<ContinuousMlpQFunction>,
        qf2: NetworkPair<ContinuousMlpQFunction>,
        replay_buffer: R,
        device: Device,
    ) -> Result<Self> {
        params.validate()?;
        let policy_optimizer = OptimizerWithMaxGrad::adam(
            policy.online_vars().clone(),
            params.policy_lr,
            params.max_grad_norm,
        )?;
        let qf1_optimizer = OptimizerWithMaxGrad::adam(
            qf1.online_vars().clone(),
            params.qf_lr,
            params.max_grad_norm,
        )?;
        let qf2_optimizer = OptimizerWithMaxGrad::adam(
            qf2.online_vars().clone(),
            params.qf_lr,
            params.max_grad_norm,
        )?;
        Ok(Self {
            params,
            policy,
            qf1,
            qf2,
            policy_optimizer,
            qf1_optimizer,
            qf2_optimizer,
            replay_buffer,
            device,
        })
    }

    pub fn params(&self) -> &Td3Params {
        &self.params
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn policy_network(&self) -> &NetworkPair<DeterministicPolicy> {
        &self.policy
    }

    pub fn qf1_network(&self) -> &NetworkPair<ContinuousMlpQFunction> {
        &self.qf1
    }

    pub fn qf2_network(&self) -> &NetworkPair<ContinuousMlpQFunction> {
        &self.qf2
    }

    pub fn replay_buffer(&self) -> &R {
        &self.replay_buffer
    }

    pub fn replay_buffer_mut(&mut self) -> &mut R {
        &mut self.replay_buffer
    }

    fn smoothed_target_actions(&self, next_observations: &Tensor) -> Result<Tensor> {
        let actions = self.policy.target.forward(next_observations)?;
        let Some(noise) = self.params.target_policy_noise else {
            return Ok(actions);
        };
        let max_action = self.policy.target.max_action();
        let eps: Vec<f32> = (0..actions.elem_count())
            .map(|_| (standard_normal() * noise.sigma).clamp(-noise.noise_clip, noise.noise_clip))
            .collect();
        let eps = Tensor::from_vec(eps, actions.shape(), actions.device())?;
        Ok((actions + eps)?.clamp(-max_action, max_action)?)
    }

    /// Observations and next observations as the networks see them.
    fn network_inputs(&self, batch: &TransitionBatch) -> Result<(Tensor, Tensor)> {
        if !self.params.input_include_goal {
            return Ok((batch.observations.clone(), batch.next_observations.clone()));
        }
        let Some(goals) = &batch.goals else {
            return Err(TwinRlError::InvalidConfig(
                "input_include_goal is set but the batch carries no goals".into(),
            )
            .into());
        };
        Ok((
            Tensor::cat(&[&batch.observations, goals], 1)?,
            Tensor::cat(&[&batch.next_observations, goals], 1)?,
        ))
    }

    /// `y = clip(reward_scale·r + (1 − d)·γ·min(Q1'(s', a'), Q2'(s', a')))` with `a' = π'(s')`.
    pub fn compute_targets(&self, batch: &TransitionBatch) -> Result<Targets> {
        let (_, next_observations) = self.network_inputs(batch)?;
        let next_actions = self.smoothed_target_actions(&next_observations)?;
        let target_qvals = self.qf1.target.forward(&next_observations, &next_actions)?;
        let target_q2vals = self.qf2.target.forward(&next_observations, &next_actions)?;
        let target_qvals = target_qvals.minimum(&target_q2vals)?;
        let not_done = batch.terminals.affine(-1., 1.)?;
        let bootstrap = (not_done * target_qvals)?.affine(self.params.discount as f64, 0.)?;
        let rewards = batch
            .rewards
            .affine(self.params.reward_scale as f64, 0.)?;
        let (lower, upper) = self.params.clip_range();
        let ys = (rewards + bootstrap)?.clamp(lower, upper)?.detach();
        Ok(Targets(ys))
    }

    /// Regresses both critics onto `targets`. The summed loss is differentiated once and each
    /// optimizer only steps the variables of its own critic.
    pub fn train_critics(
        &mut self,
        batch: &TransitionBatch,
        targets: &Targets,
    ) -> Result<CriticLosses> {
        let (observations, _) = self.network_inputs(batch)?;
        let qval1 = self.qf1.online.forward(&observations, &batch.actions)?;
        let qval2 = self.qf2.online.forward(&observations, &batch.actions)?;
        let qf1_loss = targets.sub(&qval1)?.sqr()?.mean_all()?;
        let qf2_loss = targets.sub(&qval2)?.sqr()?.mean_all()?;
        let loss = (&qf1_loss + &qf2_loss)?;
        let loss = with_weight_decay(loss, self.qf1.online_vars(), self.params.qf_weight_decay)?;
        let loss = QvalLoss(with_weight_decay(
            loss,
            self.qf2.online_vars(),
            self.params.qf_weight_decay,
        )?);
        ensure_finite("qval_loss", loss.to_scalar::<f32>()?)?;

        let mut grads = loss.backward()?;
        self.qf1_optimizer.step(&mut grads)?;
        self.qf2_optimizer.step(&mut grads)?;
        Ok(CriticLosses {
            qf1_loss: qf1_loss.to_scalar()?,
            qf2_loss: qf2_loss.to_scalar()?,
            qval1: qval1.detach(),
            qval2: qval2.detach(),
        })
    }

    /// `-mean(min(Q1(s, π(s)), Q2(s, π(s))))`, only the policy variables are stepped.
    pub fn train_actor(&mut self, batch: &TransitionBatch) -> Result<f32> {
        let (observations, _) = self.network_inputs(batch)?;
        let actions = self.policy.online.forward(&observations)?;
        let qval1 = self.qf1.online.forward(&observations, &actions)?;
        let qval2 = self.qf2.online.forward(&observations, &actions)?;
        let action_loss = qval1.minimum(&qval2)?.mean_all()?.neg()?;
        let action_loss = ActionLoss(with_weight_decay(
            action_loss,
            self.policy.online_vars(),
            self.params.policy_weight_decay,
        )?);
        let value = ensure_finite("action_loss", action_loss.to_scalar::<f32>()?)?;
        self.policy_optimizer.backward_step(&action_loss)?;
        Ok(value)
    }

    pub fn update_targets(&self) -> Result<()> {
        let tau = self.params.target_update_tau;
        self.policy.soft_update(tau)?;
        self.qf1.soft_update(tau)?;
        self.qf2.soft_update(tau)
    }

    /// One training step. `samples_data` is the data collected by the runner since the last
    /// cycle; it already went into the replay buffer, which is what the batch is drawn from.
    pub fn optimize_policy(
        &mut self,
        itr: usize,
        _samples_data: &[Transition],
    ) -> Result<Td3Losses> {
        let available = self.replay_buffer.len();
        if available < self.params.min_buffer_size.max(1) {
            return Err(TwinRlError::NotEnoughSamples {
                available,
                required: self.params.min_buffer_size.max(1),
            }
            .into());
        }
        let batch = self.replay_buffer.sample(self.params.buffer_batch_size)?;
        let targets = self.compute_targets(&batch)?;
        let critics = self.train_critics(&batch, &targets)?;
        let (qval_loss, qval) = if critics.qf2_loss <= critics.qf1_loss {
            (critics.qf2_loss, critics.qval2)
        } else {
            (critics.qf1_loss, critics.qval1)
        };
        let action_loss = if itr % self.params.policy_delay == 0 {
            let action_loss = self.train_actor(&batch)?;
            self.update_targets()?;
            Some(action_loss)
        } else {
            None
        };
        debug!(itr, qval_loss, action_loss, "td3 step");
        Ok(Td3Losses {
            qval_loss,
            targets,
            qval,
            action_loss,
        })
    }

    /// Writes the online and target weights of all three networks to `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        for (name, varmap) in self.checkpoint_files() {
            varmap.save(dir.join(name))?;
        }
        Ok(())
    }

    /// Loads weights written by [`Td3::save`] from `dir`. The networks must have the same
    /// architecture.
    pub fn load(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        for (name, mut varmap) in self.checkpoint_files() {
            varmap.load(dir.join(name))?;
        }
        Ok(())
    }

    fn checkpoint_files(&self) -> [(&'static str, candle_nn::VarMap); 6] {
        [
            ("policy.safetensors", self.policy.online_vars().clone()),
            ("target_policy.safetensors", self.policy.target_vars().clone()),
            ("qf1.safetensors", self.qf1.online_vars().clone()),
            ("target_qf1.safetensors", self.qf1.target_vars().clone()),
            ("qf2.safetensors", self.qf2.online_vars().clone()),
            ("target_qf2.safetensors", self.qf2.target_vars().clone()),
        ]
    }
}

impl<R: ReplayBuffer> OffPolicyAgent for Td3<R> {
    type Policy = DeterministicPolicy;

    fn policy(&self) -> &Self::Policy {
        &self.policy.online
    }

    fn store_transition(&mut self, transition: Transition) -> Result<()> {
        self.replay_buffer.add_transition(transition)
    }

    fn ready_to_train(&self) -> bool {
        self.replay_buffer.len() >= self.params.min_buffer_size.max(1)
    }

    fn train_step(&mut self, itr: usize, samples_data: &[Transition]) -> Result<OffPolicyStats> {
        let losses = self.optimize_policy(itr, samples_data)?;
        Ok(OffPolicyStats {
            qval_loss: losses.qval_loss,
            action_loss: losses.action_loss,
            mean_qval: losses.qval.mean_all()?.to_scalar()?,
            mean_target: losses.targets.mean_all()?.to_scalar()?,
        })
    }
}
