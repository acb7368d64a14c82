//! Collaborative editing payloads: init handshake, step submission, and the
//! two server responses.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Handshake payload naming the document a socket wants to collaborate on.
#[derive(Debug, Clone, Deserialize)]
pub struct InitPayload {
    /// Document the client is editing.
    #[serde(rename = "documentid", default)]
    pub document_id: String,

    /// Editor schema blob, kept opaque and never interpreted.
    #[serde(default)]
    pub schema: Option<Box<RawValue>>,

    /// Document version the client currently holds.
    #[serde(default)]
    pub version: i64,
}

/// One submitted batch of edit steps.
///
/// Also decoded from init payloads (with an empty `steps`) so a client is
/// offered missing steps immediately after the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSubmission {
    /// Document the batch belongs to.
    #[serde(rename = "documentid", default)]
    pub document_id: String,

    /// Version the batch is based on.
    #[serde(default)]
    pub version: i64,

    /// Editor-assigned collaboration client id.
    #[serde(rename = "clientID", default)]
    pub client_id: i64,

    /// Opaque steps, in submission order.
    #[serde(default)]
    pub steps: Vec<Box<RawValue>>,

    /// Ask receivers to run their save hook immediately.
    #[serde(default)]
    pub save_immediate: bool,
}

/// Acknowledged or missing steps sent back to clients.
///
/// Broadcast to a whole room when a batch is accepted, or sent privately to
/// one client catching up. `base_version` is the version a client must hold
/// to integrate `steps` without rebasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepsResponse {
    /// Version these steps apply on top of.
    pub base_version: i64,

    /// Room version after the steps.
    pub version: i64,

    /// Originating collaboration client id, one per step.
    #[serde(rename = "clientIds", default, skip_serializing_if = "Vec::is_empty")]
    pub client_ids: Vec<i64>,

    /// The steps themselves, byte-identical to what was submitted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Box<RawValue>>,

    /// Whether this response was produced by an init handshake.
    pub from_init: bool,

    /// Propagated save hint from the submitting client.
    pub save_immediate: bool,
}

/// Tells one client its state cannot be reconciled incrementally.
///
/// Sent when a client claims a version ahead of the room, or when the step
/// log no longer covers the gap behind it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReloadResponse {
    /// Version the client reported.
    pub base_version: i64,

    /// Version the room holds.
    pub version: i64,
}
