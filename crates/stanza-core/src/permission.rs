//! Per-document permission levels.

use std::fmt;

/// What a user may do to a specific document.
///
/// Only `Edit` may mutate room state; `Comment` exists in the domain but is
/// not currently issued by the permission oracle, so a `Comment`-level
/// client behaves like a read-only one on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    /// No access. Messages are dropped and sockets are not registered.
    #[default]
    None,
    /// May read and annotate, not edit.
    Comment,
    /// Full collaborative editing.
    Edit,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Comment => "comment",
            Self::Edit => "edit",
        };
        f.write_str(name)
    }
}
