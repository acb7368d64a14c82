//! Stanza collaboration server.
//!
//! The server-side coordination core of the collaborative rich-text editor:
//! it serializes concurrent edits per document into a single total order,
//! rebroadcasts the ordered stream so every client converges, and projects
//! embedded artifacts (links, comments, image copies) into the relational
//! store.
//!
//! # Architecture
//!
//! Actor-style components with private state and typed one-way queues:
//!
//! - [`hub::Hub`]: one process-wide task routing clients to per-document
//!   rooms and reaping empty ones.
//! - [`room`]: one task per live document, serializing version checks, step
//!   admission and broadcast fan-out.
//! - [`client`]: two tasks per socket - receive loop and send loop.
//! - [`inspector`]: classifies accepted steps and projects their side
//!   effects through the [`services::Services`] seams.
//!
//! Backends are chosen at startup: redis/postgres/http in production,
//! in-memory equivalents for tests and single-node development.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
mod collab;
pub mod error;
pub mod hub;
pub mod image;
pub mod inspector;
pub mod repository;
pub mod room;
pub mod services;
pub mod step_log;
pub mod transport;

pub use error::ServerError;
pub use hub::{Hub, HubError, HubHandle};
pub use room::{ClientHandle, RoomMessage};
pub use services::Services;
