//! Protocol error types.

use thiserror::Error;

/// Errors produced while encoding or decoding wire messages.
///
/// Protocol errors are never fatal for a connection: the server logs the
/// offending frame and keeps reading (a client bug must not be able to kick
/// other collaborators out of a room by proxy).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The outer envelope was not valid JSON or not an object.
    #[error("malformed envelope: {0}")]
    Envelope(String),

    /// A handler required a payload but the envelope carried none.
    #[error("message has no payload")]
    MissingPayload,

    /// The payload did not match the shape the message type implies.
    #[error("malformed payload: {0}")]
    Payload(String),

    /// An outbound message could not be serialized.
    #[error("could not encode message: {0}")]
    Encode(String),
}

/// Convenience alias for protocol results.
pub type Result<T> = std::result::Result<T, ProtocolError>;
