//! Repository error type.

use thiserror::Error;

/// Errors from the relational store.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A required identifier was empty.
    #[error("missing parameters")]
    MissingParameters,

    /// A reply archive matched no row owned by the requesting user.
    #[error("users may only archive their own replies")]
    NotReplyAuthor,

    /// The store could not be reached or refused the statement.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}
