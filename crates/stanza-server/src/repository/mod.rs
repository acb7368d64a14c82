//! Relational store operations.
//!
//! The collaboration core projects two things into the relational store:
//! permission lookups (read side) and the side effects extracted from
//! accepted steps - links, comments, comment replies (write side). The
//! schema itself belongs to another service; this module only names the
//! logical operations the core invokes on it.

mod error;
mod memory;
mod postgres;

use async_trait::async_trait;
pub use error::RepositoryError;
pub use memory::{MemoryRepository, StoredComment, StoredLink, StoredReply};
pub use postgres::PostgresRepository;
use stanza_core::{
    CommentAdd, CommentDelete, CommentDeleteReply, CommentDone, CommentReply, Link, Permission,
};

/// Relational store seam used by the permission oracle and the projector.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    /// Resolve a user's permission on a document version.
    ///
    /// Resolution short-circuits on the first hit: the document must be an
    /// existing draft (else `None`); sysadmins, folder managers on the
    /// document's folder, and contributors get `Edit`; everyone else gets
    /// `None`.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::MissingParameters`] if either id is empty.
    async fn fetch_permission(
        &self,
        document_version_id: &str,
        user_id: &str,
    ) -> Result<Permission, RepositoryError>;

    /// Persist a link record.
    ///
    /// Duplicates on `(document, link id, kind)` are detected and dropped
    /// silently.
    async fn save_link(
        &self,
        document_version_id: &str,
        link: &Link,
    ) -> Result<(), RepositoryError>;

    /// Soft-delete a link record.
    ///
    /// Links are archived, never removed: restored document versions still
    /// need to resolve them.
    async fn archive_link(
        &self,
        document_version_id: &str,
        link_id: &str,
        url: &str,
    ) -> Result<(), RepositoryError>;

    /// Persist a new comment. Preliminary ids are skipped silently.
    async fn save_comment(&self, comment: &CommentAdd) -> Result<(), RepositoryError>;

    /// Flag a comment as done. Preliminary ids are skipped silently.
    async fn set_comment_done(&self, done: &CommentDone) -> Result<(), RepositoryError>;

    /// Archive a comment. Preliminary ids are skipped silently.
    async fn archive_comment(&self, delete: &CommentDelete) -> Result<(), RepositoryError>;

    /// Persist a reply to an existing comment.
    async fn save_comment_reply(&self, reply: &CommentReply) -> Result<(), RepositoryError>;

    /// Archive a reply.
    ///
    /// Must affect exactly one row; zero rows means the requesting user is
    /// not the reply's author and yields
    /// [`RepositoryError::NotReplyAuthor`].
    async fn archive_comment_reply(
        &self,
        delete: &CommentDeleteReply,
    ) -> Result<(), RepositoryError>;
}
