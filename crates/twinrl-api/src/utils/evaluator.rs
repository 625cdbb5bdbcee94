use anyhow::Result;
use rand::Rng;
use tracing::info;
use twinrl_core::{env::Env, policies::Policy, rng::RNG};

/// Runs evaluation episodes without exploration noise and keeps the returns of every evaluation.
pub struct Evaluator {
    pub eval_episodes: usize,
    /// Safety net for environments without their own time limit.
    pub max_path_length: usize,
    /// Use the mean action of stochastic policies.
    pub deterministic: bool,
    pub evaluation_results: Vec<Vec<f32>>,
}

impl Evaluator {
    pub fn new(eval_episodes: usize, max_path_length: usize) -> Self {
        Self {
            eval_episodes,
            max_path_length,
            deterministic: true,
            evaluation_results: vec![],
        }
    }

    /// Undiscounted returns of `eval_episodes` episodes, averaged.
    pub fn evaluate(&mut self, env: &mut impl Env, policy: &dyn Policy) -> Result<f32> {
        let mut episode_returns = Vec::with_capacity(self.eval_episodes);
        for _ in 0..self.eval_episodes {
            let seed = RNG.with_borrow_mut(|rng| rng.random::<u64>());
            let mut state = env.reset(seed)?;
            let mut episode_return = 0.;
            for _ in 0..self.max_path_length {
                let action = if self.deterministic {
                    policy.get_deterministic_action(&state)?
                } else {
                    policy.get_action(&state)?
                };
                let snapshot = env.step(&action)?;
                episode_return += snapshot.reward;
                if snapshot.done() {
                    break;
                }
                state = snapshot.state;
            }
            episode_returns.push(episode_return);
        }
        let average_return = average(&episode_returns);
        info!(
            evaluation = self.evaluation_results.len(),
            episodes = episode_returns.len(),
            average_return,
            "evaluation finished"
        );
        self.evaluation_results.push(episode_returns);
        Ok(average_return)
    }

    pub fn average_returns(&self) -> Vec<f32> {
        self.evaluation_results
            .iter()
            .map(|returns| average(returns))
            .collect()
    }
}

fn average(values: &[f32]) -> f32 {
    values.iter().sum::<f32>() / values.len().max(1) as f32
}
