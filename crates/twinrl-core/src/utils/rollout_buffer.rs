use crate::policies::ValueFunction;
use anyhow::Result;
use candle_core::Tensor;
use derive_more::{Deref, DerefMut};

/// A trajectory segment collected by a single environment. `states` holds one more element than
/// `actions`: the state observed after the last action.
#[derive(Debug, Clone, Default)]
pub struct RolloutBuffer {
    pub states: Vec<Tensor>,
    pub actions: Vec<Tensor>,
    pub rewards: Vec<f32>,
    pub dones: Vec<bool>,
}

impl RolloutBuffer {
    pub fn push(&mut self, state: Tensor, action: Tensor, reward: f32, done: bool) {
        self.states.push(state);
        self.actions.push(action);
        self.rewards.push(reward);
        self.dones.push(done);
    }

    pub fn set_last_state(&mut self, state: Tensor) {
        self.states.push(state);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn sample_point(&self, index: usize) -> (&Tensor, &Tensor) {
        (&self.states[index], &self.actions[index])
    }

    /// Observations the actions were taken in, stacked to `[T, obs_dim]`.
    pub fn stacked_states(&self) -> Result<Tensor> {
        let states = &self.states[0..self.actions.len()];
        Ok(Tensor::stack(states, 0)?)
    }

    pub fn stacked_actions(&self) -> Result<Tensor> {
        Ok(Tensor::stack(&self.actions, 0)?)
    }

    /// Generalized advantage estimation. A done flag cuts the bootstrap from the next state.
    pub fn calculate_advantages_and_returns(
        &self,
        value_func: &impl ValueFunction,
        gamma: f32,
        lambda: f32,
    ) -> Result<(Vec<f32>, Vec<f32>)> {
        let values_stacked = value_func.calculate_values(&Tensor::stack(&self.states, 0)?)?;
        let values: Vec<f32> = values_stacked.to_vec1()?;
        Ok(gae(&self.rewards, &self.dones, &values, gamma, lambda))
    }
}

/// `values` holds one value per reward plus the value of the final state.
pub fn gae(
    rewards: &[f32],
    dones: &[bool],
    values: &[f32],
    gamma: f32,
    lambda: f32,
) -> (Vec<f32>, Vec<f32>) {
    let total_steps = rewards.len();
    let mut advantages: Vec<f32> = vec![0.; total_steps];
    let mut returns: Vec<f32> = vec![0.; total_steps];
    let mut last_gae_lam: f32 = 0.;
    for i in (0..total_steps).rev() {
        let next_non_terminal = if dones[i] {
            last_gae_lam = 0.;
            0f32
        } else {
            1.
        };
        let delta = rewards[i] + next_non_terminal * gamma * values[i + 1] - values[i];
        last_gae_lam = delta + next_non_terminal * gamma * lambda * last_gae_lam;
        advantages[i] = last_gae_lam;
        returns[i] = last_gae_lam + values[i];
    }
    (advantages, returns)
}

pub fn calculate_advantages_and_returns(
    rollouts: &[RolloutBuffer],
    value_func: &impl ValueFunction,
    gamma: f32,
    lambda: f32,
) -> Result<(Advantages, Returns)> {
    let (advantages, returns): (Vec<Vec<f32>>, Vec<Vec<f32>>) = rollouts
        .iter()
        .map(|rollout| rollout.calculate_advantages_and_returns(value_func, gamma, lambda))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .unzip();
    Ok((Advantages(advantages), Returns(returns)))
}

#[derive(Deref, DerefMut, Debug)]
pub struct Advantages(pub Vec<Vec<f32>>);

impl Advantages {
    pub fn normalize(&mut self) {
        for advantage in self.0.iter_mut() {
            if advantage.is_empty() {
                continue;
            }
            let mean = advantage.iter().sum::<f32>() / advantage.len() as f32;
            let variance =
                advantage.iter().map(|x| (*x - mean).powi(2)).sum::<f32>() / advantage.len() as f32;
            let std = variance.sqrt() + 1e-8;
            for x in advantage.iter_mut() {
                *x = (*x - mean) / std;
            }
        }
    }
}

#[derive(Deref, DerefMut, Debug)]
pub struct Returns(pub Vec<Vec<f32>>);

#[derive(Deref, DerefMut, Debug)]
pub struct Logps(pub Vec<Vec<f32>>);

#[cfg(test)]
mod test {
    use super::{Advantages, gae};

    #[test]
    fn gae_matches_hand_computation() {
        let rewards = [1., 1., 1.];
        let dones = [false, false, true];
        let values = [0.5, 0.5, 0.5, 10.];
        let (gamma, lambda) = (0.9f32, 0.8f32);
        let (advantages, returns) = gae(&rewards, &dones, &values, gamma, lambda);

        // the last step is terminal, the value of the final state is ignored
        let d2 = 1. - 0.5;
        let d1 = 1. + gamma * 0.5 - 0.5;
        let d0 = 1. + gamma * 0.5 - 0.5;
        let a2 = d2;
        let a1 = d1 + gamma * lambda * a2;
        let a0 = d0 + gamma * lambda * a1;
        for (got, expected) in advantages.iter().zip([a0, a1, a2]) {
            assert!((got - expected).abs() < 1e-6);
        }
        for (ret, adv) in returns.iter().zip(advantages.iter()) {
            assert!((ret - adv - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn done_cuts_the_bootstrap() {
        let (advantages, _) = gae(&[0., 0.], &[true, false], &[0., 0., 100.], 0.99, 0.95);
        assert_eq!(advantages[0], 0.);
        assert!(advantages[1] > 90.);
    }

    #[test]
    fn normalized_advantages_are_centred() {
        let mut advantages = Advantages(vec![vec![1., 2., 3., 4.]]);
        advantages.normalize();
        let mean = advantages[0].iter().sum::<f32>() / 4.;
        let var = advantages[0].iter().map(|a| a * a).sum::<f32>() / 4.;
        assert!(mean.abs() < 1e-6);
        assert!((var - 1.).abs() < 1e-4);
    }
}
