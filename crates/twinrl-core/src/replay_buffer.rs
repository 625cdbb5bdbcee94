use crate::{error::TwinRlError, rng::RNG};
use anyhow::Result;
use candle_core::{Device, Tensor};
use rand::Rng;

#[derive(Debug, Clone)]
pub struct Transition {
    pub observation: Vec<f32>,
    pub action: Vec<f32>,
    pub reward: f32,
    pub next_observation: Vec<f32>,
    pub terminal: bool,
    /// Goal of goal-conditioned tasks, shared by `observation` and `next_observation`.
    pub goal: Option<Vec<f32>>,
}

impl Transition {
    pub fn from_tensors(
        observation: &Tensor,
        action: &Tensor,
        reward: f32,
        next_observation: &Tensor,
        terminal: bool,
    ) -> Result<Self> {
        Ok(Self {
            observation: observation.flatten_all()?.to_vec1()?,
            action: action.flatten_all()?.to_vec1()?,
            reward,
            next_observation: next_observation.flatten_all()?.to_vec1()?,
            terminal,
            goal: None,
        })
    }

    pub fn with_goal(mut self, goal: Vec<f32>) -> Self {
        self.goal = Some(goal);
        self
    }

    fn goal_dim(&self) -> usize {
        self.goal.as_ref().map_or(0, Vec::len)
    }
}

/// A batch of transitions, every field has the batch as its first dimension. `rewards` and
/// `terminals` are column vectors so they broadcast against q-values of shape `[B, 1]`.
#[derive(Debug, Clone)]
pub struct TransitionBatch {
    pub observations: Tensor,
    pub actions: Tensor,
    pub rewards: Tensor,
    pub next_observations: Tensor,
    pub terminals: Tensor,
    /// `[B, goal_dim]`, only for goal-conditioned buffers.
    pub goals: Option<Tensor>,
}

impl TransitionBatch {
    pub fn from_transitions(transitions: &[Transition], device: &Device) -> Result<Self> {
        let batch_size = transitions.len();
        let obs_dim = transitions.first().map_or(0, |t| t.observation.len());
        let act_dim = transitions.first().map_or(0, |t| t.action.len());
        let goal_dim = transitions.first().map_or(0, Transition::goal_dim);
        let mut observations = Vec::with_capacity(batch_size * obs_dim);
        let mut actions = Vec::with_capacity(batch_size * act_dim);
        let mut next_observations = Vec::with_capacity(batch_size * obs_dim);
        let mut rewards = Vec::with_capacity(batch_size);
        let mut terminals = Vec::with_capacity(batch_size);
        let mut goals = Vec::with_capacity(batch_size * goal_dim);
        for t in transitions {
            if t.goal_dim() != goal_dim {
                return Err(TwinRlError::InvalidConfig(
                    "transitions of a batch must all carry goals of the same size".into(),
                )
                .into());
            }
            observations.extend_from_slice(&t.observation);
            actions.extend_from_slice(&t.action);
            next_observations.extend_from_slice(&t.next_observation);
            rewards.push(t.reward);
            terminals.push(if t.terminal { 1f32 } else { 0. });
            if let Some(goal) = &t.goal {
                goals.extend_from_slice(goal);
            }
        }
        let goals = if goal_dim > 0 {
            Some(Tensor::from_vec(goals, (batch_size, goal_dim), device)?)
        } else {
            None
        };
        Ok(Self {
            observations: Tensor::from_vec(observations, (batch_size, obs_dim), device)?,
            actions: Tensor::from_vec(actions, (batch_size, act_dim), device)?,
            rewards: Tensor::from_vec(rewards, (batch_size, 1), device)?,
            next_observations: Tensor::from_vec(next_observations, (batch_size, obs_dim), device)?,
            terminals: Tensor::from_vec(terminals, (batch_size, 1), device)?,
            goals,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.rewards.dims()[0]
    }
}

pub trait ReplayBuffer {
    fn add_transition(&mut self, transition: Transition) -> Result<()>;

    fn sample(&self, batch_size: usize) -> Result<TransitionBatch>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed capacity ring buffer. Once full, the oldest transition is overwritten. Sampling is
/// uniform and with replacement. A buffer with a non zero `goal_dim` only accepts transitions
/// carrying a goal of that size.
pub struct UniformReplayBuffer {
    capacity: usize,
    obs_dim: usize,
    act_dim: usize,
    goal_dim: usize,
    observations: Vec<f32>,
    actions: Vec<f32>,
    rewards: Vec<f32>,
    next_observations: Vec<f32>,
    terminals: Vec<f32>,
    goals: Vec<f32>,
    position: usize,
    size: usize,
    device: Device,
}

impl UniformReplayBuffer {
    pub fn new(capacity: usize, obs_dim: usize, act_dim: usize, device: Device) -> Result<Self> {
        Self::goal_conditioned(capacity, obs_dim, 0, act_dim, device)
    }

    pub fn goal_conditioned(
        capacity: usize,
        obs_dim: usize,
        goal_dim: usize,
        act_dim: usize,
        device: Device,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(TwinRlError::InvalidConfig("replay buffer capacity is 0".into()).into());
        }
        Ok(Self {
            capacity,
            obs_dim,
            act_dim,
            goal_dim,
            observations: vec![0.; capacity * obs_dim],
            actions: vec![0.; capacity * act_dim],
            rewards: vec![0.; capacity],
            next_observations: vec![0.; capacity * obs_dim],
            terminals: vec![0.; capacity],
            goals: vec![0.; capacity * goal_dim],
            position: 0,
            size: 0,
            device,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn goal_dim(&self) -> usize {
        self.goal_dim
    }

    fn gather(source: &[f32], dim: usize, indicies: &[usize]) -> Vec<f32> {
        indicies
            .iter()
            .flat_map(|idx| source[idx * dim..(idx + 1) * dim].iter().copied())
            .collect()
    }
}

impl ReplayBuffer for UniformReplayBuffer {
    fn add_transition(&mut self, transition: Transition) -> Result<()> {
        if transition.observation.len() != self.obs_dim
            || transition.next_observation.len() != self.obs_dim
            || transition.action.len() != self.act_dim
            || transition.goal_dim() != self.goal_dim
        {
            return Err(TwinRlError::InvalidConfig(format!(
                "transition with observation size {}, goal size {} and action size {} does not fit a buffer of {}x{}x{}",
                transition.observation.len(),
                transition.goal_dim(),
                transition.action.len(),
                self.obs_dim,
                self.goal_dim,
                self.act_dim
            ))
            .into());
        }
        let i = self.position;
        self.observations[i * self.obs_dim..(i + 1) * self.obs_dim]
            .copy_from_slice(&transition.observation);
        self.next_observations[i * self.obs_dim..(i + 1) * self.obs_dim]
            .copy_from_slice(&transition.next_observation);
        self.actions[i * self.act_dim..(i + 1) * self.act_dim].copy_from_slice(&transition.action);
        self.rewards[i] = transition.reward;
        self.terminals[i] = if transition.terminal { 1. } else { 0. };
        if let Some(goal) = &transition.goal {
            self.goals[i * self.goal_dim..(i + 1) * self.goal_dim].copy_from_slice(goal);
        }
        self.position = (self.position + 1) % self.capacity;
        self.size = (self.size + 1).min(self.capacity);
        Ok(())
    }

    fn sample(&self, batch_size: usize) -> Result<TransitionBatch> {
        if self.size == 0 {
            return Err(TwinRlError::NotEnoughSamples {
                available: 0,
                required: 1,
            }
            .into());
        }
        let indicies: Vec<usize> = RNG.with_borrow_mut(|rng| {
            (0..batch_size)
                .map(|_| rng.random_range(0..self.size))
                .collect()
        });
        let device = &self.device;
        Ok(TransitionBatch {
            observations: Tensor::from_vec(
                Self::gather(&self.observations, self.obs_dim, &indicies),
                (batch_size, self.obs_dim),
                device,
            )?,
            actions: Tensor::from_vec(
                Self::gather(&self.actions, self.act_dim, &indicies),
                (batch_size, self.act_dim),
                device,
            )?,
            rewards: Tensor::from_vec(
                Self::gather(&self.rewards, 1, &indicies),
                (batch_size, 1),
                device,
            )?,
            next_observations: Tensor::from_vec(
                Self::gather(&self.next_observations, self.obs_dim, &indicies),
                (batch_size, self.obs_dim),
                device,
            )?,
            terminals: Tensor::from_vec(
                Self::gather(&self.terminals, 1, &indicies),
                (batch_size, 1),
                device,
            )?,
            goals: if self.goal_dim > 0 {
                Some(Tensor::from_vec(
                    Self::gather(&self.goals, self.goal_dim, &indicies),
                    (batch_size, self.goal_dim),
                    device,
                )?)
            } else {
                None
            },
        })
    }

    fn len(&self) -> usize {
        self.size
    }
}
