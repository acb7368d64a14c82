//! The two-field wire envelope and its message type discriminants.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::value::RawValue;

use crate::errors::{ProtocolError, Result};

/// Message types recognized on the wire.
///
/// Inbound frames carry `Init`, `Update`, `Steps` or `Approval`; the server
/// emits `Steps` and `Reload`. Anything else decodes to [`MessageType::Unknown`]
/// and is dropped during triage instead of failing the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Handshake naming the document a client wants to join.
    #[serde(rename = "prosemirror-init")]
    Init,
    /// Submission of one batch of edit steps.
    #[serde(rename = "prosemirror-update")]
    Update,
    /// Step batch submission or server step broadcast.
    #[serde(rename = "prosemirror-steps")]
    Steps,
    /// Reserved; carries no server-side behavior.
    #[serde(rename = "prosemirror-approval")]
    Approval,
    /// Server to client only: the client must reload the document.
    #[serde(rename = "prosemirror-reload")]
    Reload,
    /// Any unrecognized (or absent) type string.
    #[default]
    #[serde(other)]
    Unknown,
}

/// Decoded wire envelope.
///
/// The payload is kept as raw JSON; handlers decode it into a typed shape
/// once triage has established what the message is.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    /// Message discriminant.
    #[serde(rename = "type", default)]
    pub kind: MessageType,

    /// Opaque payload, absent for bare control messages.
    #[serde(default)]
    pub payload: Option<Box<RawValue>>,
}

impl Envelope {
    /// Decode a text frame into an envelope.
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::Envelope(e.to_string()))
    }

    /// Decode the payload into the typed shape `T`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::MissingPayload`] if the envelope carried no payload,
    /// [`ProtocolError::Payload`] if the payload does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = self.payload.as_deref().ok_or(ProtocolError::MissingPayload)?;
        serde_json::from_str(raw.get()).map_err(|e| ProtocolError::Payload(e.to_string()))
    }
}

/// Outbound envelope sent back to clients.
///
/// Generic over the payload so each handler can pair a [`MessageType`] with
/// its typed response shape and encode in one step.
#[derive(Debug, Clone, Serialize)]
pub struct Response<P> {
    /// Message discriminant.
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Typed payload.
    pub payload: P,
}

impl<P: Serialize> Response<P> {
    /// Pair a message type with its payload.
    pub fn new(kind: MessageType, payload: P) -> Self {
        Self { kind, payload }
    }

    /// Encode the response as a JSON text frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::collab::{InitPayload, ReloadResponse};

    #[test]
    fn decode_init_envelope() {
        let raw = r#"{"type":"prosemirror-init","payload":{"documentid":"doc-1","version":3}}"#;
        let envelope = Envelope::decode(raw).expect("decode failed");

        assert_eq!(envelope.kind, MessageType::Init);

        let payload: InitPayload = envelope.payload_as().expect("payload decode failed");
        assert_eq!(payload.document_id, "doc-1");
        assert_eq!(payload.version, 3);
    }

    #[test]
    fn unknown_type_is_tolerated() {
        let raw = r#"{"type":"prosemirror-cursor","payload":{}}"#;
        let envelope = Envelope::decode(raw).expect("decode failed");
        assert_eq!(envelope.kind, MessageType::Unknown);
    }

    #[test]
    fn missing_type_defaults_to_unknown() {
        let envelope = Envelope::decode(r#"{"payload":{}}"#).expect("decode failed");
        assert_eq!(envelope.kind, MessageType::Unknown);
    }

    #[test]
    fn missing_payload_is_an_error_only_when_requested() {
        let envelope = Envelope::decode(r#"{"type":"prosemirror-approval"}"#).expect("decode");
        assert!(envelope.payload.is_none());

        let err = envelope.payload_as::<InitPayload>().unwrap_err();
        assert!(matches!(err, ProtocolError::MissingPayload));
    }

    #[test]
    fn garbage_frame_is_an_envelope_error() {
        let err = Envelope::decode("not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Envelope(_)));
    }

    #[test]
    fn response_encodes_wire_type_string() {
        let response = Response::new(
            MessageType::Reload,
            ReloadResponse { base_version: 10, version: 2 },
        );
        let encoded = response.encode().expect("encode failed");

        assert!(encoded.contains(r#""type":"prosemirror-reload""#));
        assert!(encoded.contains(r#""base_version":10"#));
        assert!(encoded.contains(r#""version":2"#));
    }
}
