//! Comment sub-step payloads.
//!
//! These decode from the `payload` of a custom step with
//! `stepType = "comment"`. Author and user ids are never trusted from the
//! payload - the server stamps them from the session before the record
//! reaches the repository.

use serde::Deserialize;

/// Prefix of client-generated placeholder ids.
///
/// The editor assigns a preliminary id while a comment is still being typed;
/// such records must never be persisted.
const PRELIMINARY_PREFIX: &str = "preliminary";

/// Whether an id is a client-side placeholder that must not be persisted.
pub fn is_preliminary(id: &str) -> bool {
    id.starts_with(PRELIMINARY_PREFIX)
}

/// A new comment on a document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommentAdd {
    /// Document the comment belongs to; stamped by the server.
    #[serde(skip)]
    pub document_version_id: String,

    /// Comment id chosen by the client.
    #[serde(default)]
    pub id: String,

    /// Author; stamped by the server from the session user.
    #[serde(skip)]
    pub author_id: String,

    /// Comment text.
    #[serde(default)]
    pub message: String,

    /// Where in the document the comment was made.
    #[serde(default)]
    pub origin: String,
}

/// Marks a comment as resolved.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommentDone {
    /// Comment to resolve.
    #[serde(default)]
    pub id: String,

    /// Resolving user; stamped by the server.
    #[serde(skip)]
    pub user_id: String,
}

/// Archives a comment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommentDelete {
    /// Comment to archive.
    #[serde(default)]
    pub id: String,

    /// Archiving user; stamped by the server.
    #[serde(skip)]
    pub user_id: String,
}

/// A reply to an existing comment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommentReply {
    /// Reply id chosen by the client.
    #[serde(rename = "id", default)]
    pub reply_id: String,

    /// Comment being replied to.
    #[serde(rename = "commentId", default)]
    pub comment_id: String,

    /// Author; stamped by the server.
    #[serde(skip)]
    pub author_id: String,

    /// Reply text.
    #[serde(default)]
    pub message: String,
}

/// Archives a reply. Only the reply's author may do this.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommentDeleteReply {
    /// Comment the reply belongs to.
    #[serde(rename = "commentId", default)]
    pub comment_id: String,

    /// Reply to archive.
    #[serde(rename = "replyId", default)]
    pub reply_id: String,

    /// Requesting user; stamped by the server.
    #[serde(skip)]
    pub user_id: String,
}
