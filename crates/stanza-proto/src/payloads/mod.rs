//! Typed payload shapes.
//!
//! The envelope identifies the message; these structs give each message its
//! shape. Field renames pin the exact wire names (`documentid`, `clientID`,
//! `base_version`, ...) so the Rust names can stay idiomatic. Every inbound
//! field defaults when absent - clients routinely omit empty members and an
//! init payload is also run through the step-submission path, where its
//! missing `steps` must read as an empty batch.

pub mod collab;
