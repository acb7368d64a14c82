//! Wire protocol for the stanza collaboration server.
//!
//! Every frame on the socket is a JSON text message with a two-field
//! envelope: `{"type": <string>, "payload": <opaque JSON>}`. The envelope is
//! decoded eagerly so the server can triage on `type`, while the payload is
//! kept as raw JSON until a handler knows which typed shape to expect.
//!
//! Editor steps inside a payload are never interpreted by the server beyond
//! side-effect inspection; they are stored and rebroadcast byte-for-byte.
//! [`serde_json::value::RawValue`] carries them so re-encoding cannot
//! reorder keys or drop unknown fields.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
mod errors;
pub mod payloads;

pub use envelope::{Envelope, MessageType, Response};
pub use errors::{ProtocolError, Result};
