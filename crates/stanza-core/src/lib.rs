//! Domain types shared across the stanza collaboration server.
//!
//! This crate is pure data and classification logic - no I/O, no runtime.
//! The server crate layers rooms, storage and transport on top of it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod comment;
pub mod image;
pub mod link;
pub mod permission;
pub mod session;
pub mod step;

pub use comment::{
    CommentAdd, CommentDelete, CommentDeleteReply, CommentDone, CommentReply, is_preliminary,
};
pub use image::ImageCopy;
pub use link::{Link, LinkKind};
pub use permission::Permission;
pub use session::{SessionError, SessionInfo};
pub use step::{CustomStep, Mark, MarkStep, ReplaceStep, StepContent, StepKind, classify};
