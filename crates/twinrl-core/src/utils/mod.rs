pub mod rollout_buffer;
pub mod running_mean;
