//! In-memory repository for tests and single-node development.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use stanza_core::{
    CommentAdd, CommentDelete, CommentDeleteReply, CommentDone, CommentReply, Link, Permission,
    is_preliminary,
};

use super::{Repository, RepositoryError};

/// A persisted link with its archive state.
#[derive(Debug, Clone)]
pub struct StoredLink {
    /// Document the link belongs to.
    pub document_version_id: String,
    /// The link itself.
    pub link: Link,
    /// Whether the link has been soft-deleted.
    pub archived: bool,
}

/// A persisted comment.
#[derive(Debug, Clone)]
pub struct StoredComment {
    /// Comment id.
    pub id: String,
    /// Author of the comment.
    pub author_id: String,
    /// Comment text.
    pub message: String,
    /// Where in the document the comment was made.
    pub origin: String,
    /// Document the comment belongs to.
    pub document_version_id: String,
    /// Who resolved the comment, if anyone.
    pub done_by: Option<String>,
    /// Who archived the comment, if anyone.
    pub archived_by: Option<String>,
}

/// A persisted comment reply.
#[derive(Debug, Clone)]
pub struct StoredReply {
    /// Reply id.
    pub reply_id: String,
    /// Comment being replied to.
    pub comment_id: String,
    /// Author of the reply.
    pub author_id: String,
    /// Reply text.
    pub message: String,
    /// Who archived the reply, if anyone.
    pub archived_by: Option<String>,
}

#[derive(Default)]
struct Inner {
    drafts: HashSet<String>,
    sysadmins: HashSet<String>,
    folder_managers: HashSet<(String, String)>,
    contributors: HashSet<(String, String)>,
    links: Vec<StoredLink>,
    comments: HashMap<String, StoredComment>,
    replies: HashMap<String, StoredReply>,
}

/// In-memory repository.
///
/// Permission facts are seeded through the builder-style `grant_*` methods;
/// everything defaults to deny. Uses `lock().expect()` which will panic if
/// the mutex is poisoned - acceptable for test/development code.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    inner: Arc<Mutex<Inner>>,
}

#[allow(clippy::expect_used)]
impl MemoryRepository {
    /// Create an empty repository; all permission lookups resolve to `None`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a document version as an editable draft.
    pub fn add_draft(&self, document_version_id: &str) {
        self.inner
            .lock()
            .expect("Mutex poisoned")
            .drafts
            .insert(document_version_id.to_string());
    }

    /// Grant a user sysadmin rights.
    pub fn grant_sysadmin(&self, user_id: &str) {
        self.inner.lock().expect("Mutex poisoned").sysadmins.insert(user_id.to_string());
    }

    /// Grant a user manage rights on a document's folder.
    pub fn grant_folder_manage(&self, document_version_id: &str, user_id: &str) {
        self.inner
            .lock()
            .expect("Mutex poisoned")
            .folder_managers
            .insert((document_version_id.to_string(), user_id.to_string()));
    }

    /// Make a user a contributor on a document.
    pub fn grant_contributor(&self, document_version_id: &str, user_id: &str) {
        self.inner
            .lock()
            .expect("Mutex poisoned")
            .contributors
            .insert((document_version_id.to_string(), user_id.to_string()));
    }

    /// Every stored link, in insertion order.
    pub fn links(&self) -> Vec<StoredLink> {
        self.inner.lock().expect("Mutex poisoned").links.clone()
    }

    /// A stored comment by id.
    pub fn comment(&self, id: &str) -> Option<StoredComment> {
        self.inner.lock().expect("Mutex poisoned").comments.get(id).cloned()
    }

    /// Number of stored comments.
    pub fn comment_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").comments.len()
    }

    /// A stored reply by id.
    pub fn reply(&self, id: &str) -> Option<StoredReply> {
        self.inner.lock().expect("Mutex poisoned").replies.get(id).cloned()
    }
}

#[async_trait]
#[allow(clippy::expect_used)]
impl Repository for MemoryRepository {
    async fn fetch_permission(
        &self,
        document_version_id: &str,
        user_id: &str,
    ) -> Result<Permission, RepositoryError> {
        if document_version_id.is_empty() || user_id.is_empty() {
            return Err(RepositoryError::MissingParameters);
        }

        let inner = self.inner.lock().expect("Mutex poisoned");

        if !inner.drafts.contains(document_version_id) {
            return Ok(Permission::None);
        }

        if inner.sysadmins.contains(user_id) {
            return Ok(Permission::Edit);
        }

        let key = (document_version_id.to_string(), user_id.to_string());
        if inner.folder_managers.contains(&key) || inner.contributors.contains(&key) {
            return Ok(Permission::Edit);
        }

        Ok(Permission::None)
    }

    async fn save_link(
        &self,
        document_version_id: &str,
        link: &Link,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let exists = inner.links.iter().any(|stored| {
            stored.document_version_id == document_version_id
                && stored.link.id == link.id
                && stored.link.kind == link.kind
        });
        if exists {
            return Ok(());
        }

        inner.links.push(StoredLink {
            document_version_id: document_version_id.to_string(),
            link: link.clone(),
            archived: false,
        });
        Ok(())
    }

    async fn archive_link(
        &self,
        document_version_id: &str,
        link_id: &str,
        url: &str,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        for stored in &mut inner.links {
            if stored.document_version_id == document_version_id
                && stored.link.id == link_id
                && stored.link.url == url
            {
                stored.archived = true;
            }
        }
        Ok(())
    }

    async fn save_comment(&self, comment: &CommentAdd) -> Result<(), RepositoryError> {
        if is_preliminary(&comment.id) {
            return Ok(());
        }

        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.comments.insert(comment.id.clone(), StoredComment {
            id: comment.id.clone(),
            author_id: comment.author_id.clone(),
            message: comment.message.clone(),
            origin: comment.origin.clone(),
            document_version_id: comment.document_version_id.clone(),
            done_by: None,
            archived_by: None,
        });
        Ok(())
    }

    async fn set_comment_done(&self, done: &CommentDone) -> Result<(), RepositoryError> {
        if is_preliminary(&done.id) {
            return Ok(());
        }

        let mut inner = self.inner.lock().expect("Mutex poisoned");
        if let Some(comment) = inner.comments.get_mut(&done.id) {
            comment.done_by = Some(done.user_id.clone());
        }
        Ok(())
    }

    async fn archive_comment(&self, delete: &CommentDelete) -> Result<(), RepositoryError> {
        if is_preliminary(&delete.id) {
            return Ok(());
        }

        let mut inner = self.inner.lock().expect("Mutex poisoned");
        if let Some(comment) = inner.comments.get_mut(&delete.id) {
            comment.archived_by = Some(delete.user_id.clone());
        }
        Ok(())
    }

    async fn save_comment_reply(&self, reply: &CommentReply) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.replies.insert(reply.reply_id.clone(), StoredReply {
            reply_id: reply.reply_id.clone(),
            comment_id: reply.comment_id.clone(),
            author_id: reply.author_id.clone(),
            message: reply.message.clone(),
            archived_by: None,
        });
        Ok(())
    }

    async fn archive_comment_reply(
        &self,
        delete: &CommentDeleteReply,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let matched = inner.replies.get_mut(&delete.reply_id).filter(|reply| {
            reply.comment_id == delete.comment_id && reply.author_id == delete.user_id
        });

        match matched {
            Some(reply) => {
                reply.archived_by = Some(delete.user_id.clone());
                Ok(())
            },
            None => Err(RepositoryError::NotReplyAuthor),
        }
    }
}

#[cfg(test)]
mod tests {
    use stanza_core::LinkKind;

    use super::*;

    fn link(id: &str, kind: LinkKind) -> Link {
        Link { id: id.to_string(), kind, url: format!("/x/{id}"), name: id.to_string() }
    }

    #[tokio::test]
    async fn permission_requires_both_parameters() {
        let repo = MemoryRepository::new();

        assert!(matches!(
            repo.fetch_permission("", "user").await,
            Err(RepositoryError::MissingParameters)
        ));
        assert!(matches!(
            repo.fetch_permission("doc", "").await,
            Err(RepositoryError::MissingParameters)
        ));
    }

    #[tokio::test]
    async fn permission_denies_non_draft_documents() {
        let repo = MemoryRepository::new();
        repo.grant_sysadmin("admin");

        // Even a sysadmin gets nothing on an unknown/non-draft document.
        let permission = repo.fetch_permission("doc", "admin").await.unwrap();
        assert_eq!(permission, Permission::None);
    }

    #[tokio::test]
    async fn permission_resolution_chain() {
        let repo = MemoryRepository::new();
        repo.add_draft("doc");
        repo.grant_sysadmin("admin");
        repo.grant_folder_manage("doc", "manager");
        repo.grant_contributor("doc", "writer");

        assert_eq!(repo.fetch_permission("doc", "admin").await.unwrap(), Permission::Edit);
        assert_eq!(repo.fetch_permission("doc", "manager").await.unwrap(), Permission::Edit);
        assert_eq!(repo.fetch_permission("doc", "writer").await.unwrap(), Permission::Edit);
        assert_eq!(repo.fetch_permission("doc", "stranger").await.unwrap(), Permission::None);
    }

    #[tokio::test]
    async fn duplicate_links_are_dropped_silently() {
        let repo = MemoryRepository::new();

        repo.save_link("doc", &link("l1", LinkKind::Weblink)).await.unwrap();
        repo.save_link("doc", &link("l1", LinkKind::Weblink)).await.unwrap();
        // Same id under another kind is a distinct record.
        repo.save_link("doc", &link("l1", LinkKind::File)).await.unwrap();

        assert_eq!(repo.links().len(), 2);
    }

    #[tokio::test]
    async fn archive_link_is_a_soft_delete() {
        let repo = MemoryRepository::new();
        let l = link("l1", LinkKind::File);

        repo.save_link("doc", &l).await.unwrap();
        repo.archive_link("doc", "l1", &l.url).await.unwrap();

        let links = repo.links();
        assert_eq!(links.len(), 1);
        assert!(links[0].archived);
    }

    #[tokio::test]
    async fn preliminary_comments_are_never_persisted() {
        let repo = MemoryRepository::new();

        let comment = CommentAdd {
            id: "preliminary-1".to_string(),
            message: "draft".to_string(),
            ..CommentAdd::default()
        };
        repo.save_comment(&comment).await.unwrap();

        assert_eq!(repo.comment_count(), 0);
    }

    #[tokio::test]
    async fn comment_lifecycle() {
        let repo = MemoryRepository::new();

        let comment = CommentAdd {
            id: "c1".to_string(),
            author_id: "alice".to_string(),
            message: "look here".to_string(),
            origin: "p2".to_string(),
            document_version_id: "doc".to_string(),
        };
        repo.save_comment(&comment).await.unwrap();

        repo.set_comment_done(&CommentDone { id: "c1".to_string(), user_id: "bob".to_string() })
            .await
            .unwrap();
        repo.archive_comment(&CommentDelete {
            id: "c1".to_string(),
            user_id: "carol".to_string(),
        })
        .await
        .unwrap();

        let stored = repo.comment("c1").unwrap();
        assert_eq!(stored.author_id, "alice");
        assert_eq!(stored.done_by.as_deref(), Some("bob"));
        assert_eq!(stored.archived_by.as_deref(), Some("carol"));
    }

    #[tokio::test]
    async fn only_the_author_archives_a_reply() {
        let repo = MemoryRepository::new();

        repo.save_comment_reply(&CommentReply {
            reply_id: "r1".to_string(),
            comment_id: "c1".to_string(),
            author_id: "alice".to_string(),
            message: "mine".to_string(),
        })
        .await
        .unwrap();

        let by_other = CommentDeleteReply {
            comment_id: "c1".to_string(),
            reply_id: "r1".to_string(),
            user_id: "bob".to_string(),
        };
        assert!(matches!(
            repo.archive_comment_reply(&by_other).await,
            Err(RepositoryError::NotReplyAuthor)
        ));

        let by_author = CommentDeleteReply { user_id: "alice".to_string(), ..by_other };
        repo.archive_comment_reply(&by_author).await.unwrap();
        assert_eq!(repo.reply("r1").unwrap().archived_by.as_deref(), Some("alice"));
    }
}
