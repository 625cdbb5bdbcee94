use anyhow::Result;
use candle_core::Tensor;

/// Maps observations to actions. Observations passed to `get_action` are flattened, single
/// observations. The returned action is detached from the computation graph.
pub trait Policy {
    fn get_action(&self, observation: &Tensor) -> Result<Tensor>;

    /// The action used for evaluation. Stochastic policies return their mean here.
    fn get_deterministic_action(&self, observation: &Tensor) -> Result<Tensor> {
        self.get_action(observation)
    }
}

pub trait StochasticPolicy: Policy {
    /// Log likelihood of a batch of actions, shape `[B]`.
    fn log_probs(&self, observations: &Tensor, actions: &Tensor) -> Result<Tensor>;

    /// Entropy of the action distribution, a scalar tensor.
    fn entropy(&self) -> Result<Tensor>;

    fn std(&self) -> Result<f32>;
}

pub trait ValueFunction {
    /// State values of a batch of observations, shape `[B]`.
    fn calculate_values(&self, observations: &Tensor) -> Result<Tensor>;
}

pub trait QFunction {
    /// Q-values of a batch of observation-action pairs, shape `[B, 1]`.
    fn get_qval(&self, observations: &Tensor, actions: &Tensor) -> Result<Tensor>;
}

// convinience trait
pub trait LearningModule {
    type Losses;

    fn update(&mut self, losses: Self::Losses) -> Result<()>;
}
