pub mod env;
pub mod error;
pub mod exploration;
pub mod off_policy_algorithm;
pub mod on_policy_algorithm;
pub mod policies;
pub mod replay_buffer;
pub mod rng;
pub mod sampler;
pub mod tensors;
pub mod utils;

use anyhow::Result;

/// A learning algorithm. `OnPolicyAlgorithm` drives PPO style agents, `OffPolicyAlgorithm` drives
/// agents learning from a replay buffer such as TD3.
pub trait Algorithm {
    fn train(&mut self) -> Result<()>;
}
