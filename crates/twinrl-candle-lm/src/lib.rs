pub mod continuous_policy;
pub mod distributions;
pub mod learning_module;
pub mod optimizer;
pub mod q_function;
pub mod regularization;
pub mod rollout_batch;
pub mod target_network;
pub mod thread_safe_sequential;
