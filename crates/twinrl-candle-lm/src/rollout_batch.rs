use anyhow::Result;
use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use twinrl_core::{
    rng::RNG,
    utils::rollout_buffer::{Advantages, Logps, Returns, RolloutBuffer},
};

/// A shuffled minibatch drawn from a set of rollouts.
pub struct RolloutBatch {
    pub observations: Tensor,
    pub actions: Tensor,
    pub returns: Tensor,
    pub advantages: Tensor,
    pub logp_old: Tensor,
}

/// Visits every collected step once per pass, in random order, `sample_size` steps at a time.
/// A trailing batch smaller than `sample_size` is dropped unless it is the only batch.
pub struct RolloutBatchIterator<'a> {
    rollouts: &'a [RolloutBuffer],
    advantages: &'a Advantages,
    returns: &'a Returns,
    logps: &'a Logps,
    indicies: Vec<(usize, usize)>,
    current: usize,
    sample_size: usize,
    device: Device,
}

impl<'a> RolloutBatchIterator<'a> {
    pub fn new(
        rollouts: &'a [RolloutBuffer],
        advantages: &'a Advantages,
        returns: &'a Returns,
        logps: &'a Logps,
        sample_size: usize,
        device: Device,
    ) -> Self {
        let mut indicies: Vec<(usize, usize)> = rollouts
            .iter()
            .enumerate()
            .flat_map(|(i, rb)| (0..rb.len()).map(move |j| (i, j)))
            .collect();
        RNG.with_borrow_mut(|rng| indicies.shuffle(rng));
        let sample_size = sample_size.clamp(1, indicies.len().max(1));
        Self {
            rollouts,
            advantages,
            returns,
            logps,
            indicies,
            current: 0,
            sample_size,
            device,
        }
    }

    fn batch(&self, batch_indicies: &[(usize, usize)]) -> Result<RolloutBatch> {
        let mut states = Vec::with_capacity(batch_indicies.len());
        let mut actions = Vec::with_capacity(batch_indicies.len());
        let mut advantages = Vec::with_capacity(batch_indicies.len());
        let mut returns = Vec::with_capacity(batch_indicies.len());
        let mut logps = Vec::with_capacity(batch_indicies.len());
        for &(rollout_idx, idx) in batch_indicies {
            let (state, action) = self.rollouts[rollout_idx].sample_point(idx);
            states.push(state.clone());
            actions.push(action.clone());
            advantages.push(self.advantages[rollout_idx][idx]);
            returns.push(self.returns[rollout_idx][idx]);
            logps.push(self.logps[rollout_idx][idx]);
        }
        let n = batch_indicies.len();
        Ok(RolloutBatch {
            observations: Tensor::stack(&states, 0)?.to_device(&self.device)?,
            actions: Tensor::stack(&actions, 0)?.to_device(&self.device)?,
            returns: Tensor::from_vec(returns, n, &self.device)?,
            advantages: Tensor::from_vec(advantages, n, &self.device)?,
            logp_old: Tensor::from_vec(logps, n, &self.device)?,
        })
    }
}

impl Iterator for RolloutBatchIterator<'_> {
    type Item = Result<RolloutBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        let end = self.current + self.sample_size;
        if end > self.indicies.len() {
            return None;
        }
        let batch = self.batch(&self.indicies[self.current..end]);
        self.current = end;
        Some(batch)
    }
}
