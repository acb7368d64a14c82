//! Session header parsing.
//!
//! The auth service in front of this one validates the user and passes the
//! result along in a `Session` header: base64-encoded JSON. A connection
//! without a parseable header is rejected before the websocket upgrade.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use thiserror::Error;

/// Errors from parsing the `Session` header.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The header was absent or empty.
    #[error("no session information provided")]
    Missing,

    /// The header was not valid base64.
    #[error("session header is not base64: {0}")]
    Encoding(String),

    /// The decoded bytes were not the expected JSON object.
    #[error("session header is not valid JSON: {0}")]
    Parse(String),
}

/// Pre-validated session info injected by the auth layer.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    /// Authenticated user.
    #[serde(default)]
    pub user_id: String,

    /// Group memberships of the user.
    #[serde(default)]
    pub memberships: Vec<String>,

    /// Whether the upstream signature check passed.
    #[serde(default)]
    pub signed: bool,
}

impl SessionInfo {
    /// Parse the base64-encoded JSON session header.
    pub fn parse(encoded: &str) -> Result<Self, SessionError> {
        if encoded.is_empty() {
            return Err(SessionError::Missing);
        }

        let bytes =
            STANDARD.decode(encoded).map_err(|e| SessionError::Encoding(e.to_string()))?;

        serde_json::from_slice(&bytes).map_err(|e| SessionError::Parse(e.to_string()))
    }
}
