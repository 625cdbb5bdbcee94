use thiserror::Error;

#[derive(Debug, Error)]
pub enum TwinRlError {
    #[error("{name} is not finite: {value}")]
    NonFiniteLoss { name: &'static str, value: f32 },

    #[error("replay buffer holds {available} transitions, at least {required} are required")]
    NotEnoughSamples { available: usize, required: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("parameter mismatch: {0}")]
    ParameterMismatch(String),
}

/// Fails with `NonFiniteLoss` when a loss diverged.
pub fn ensure_finite(name: &'static str, value: f32) -> Result<f32, TwinRlError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(TwinRlError::NonFiniteLoss { name, value })
    }
}
