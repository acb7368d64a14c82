//! Server error types.

use thiserror::Error;

use crate::repository::RepositoryError;
use crate::step_log::StepLogError;

/// Errors that can occur while bootstrapping or running the server.
///
/// Once a room is running, errors stay inside it: a room applies a message,
/// rejects it privately, or ignores it. `ServerError` therefore only shows
/// up during startup (configuration, backend connections, binding) and in
/// the accept loop.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid configuration (bind address, backend urls).
    #[error("configuration error: {0}")]
    Config(String),

    /// Listener or socket failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Step log backend could not be reached.
    #[error(transparent)]
    StepLog(#[from] StepLogError),

    /// Relational store could not be reached.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
