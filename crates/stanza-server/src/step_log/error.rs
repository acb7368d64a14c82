//! Step log error type.

use thiserror::Error;

/// Errors from the step log backend.
///
/// All variants are logged at debug level by callers; a step log failure
/// aborts the remainder of the current batch but never the room.
#[derive(Debug, Clone, Error)]
pub enum StepLogError {
    /// The backend could not be reached or refused the operation.
    #[error("step log unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for StepLogError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}
