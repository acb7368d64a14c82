//! Postgres-backed repository.
//!
//! Statements are runtime-checked (`sqlx::query`) so the crate builds
//! without a live database; the schema is owned by the document service and
//! only referenced here.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row as _};
use stanza_core::{
    CommentAdd, CommentDelete, CommentDeleteReply, CommentDone, CommentReply, Link, Permission,
    is_preliminary,
};

use super::{Repository, RepositoryError};

/// Repository backed by the shared postgres instance.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Connect to the postgres instance at `url`.
    pub async fn connect(url: &str) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new().max_connections(8).connect(url).await?;

        tracing::info!("connected to postgres repository");

        Ok(Self { pool })
    }

    async fn exists(&self, statement: &str, binds: &[&str]) -> Result<bool, RepositoryError> {
        let mut query = sqlx::query(statement);
        for bind in binds {
            query = query.bind(bind);
        }

        let row = query.fetch_one(&self.pool).await?;
        Ok(row.try_get::<bool, _>(0)?)
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn fetch_permission(
        &self,
        document_version_id: &str,
        user_id: &str,
    ) -> Result<Permission, RepositoryError> {
        if document_version_id.is_empty() || user_id.is_empty() {
            return Err(RepositoryError::MissingParameters);
        }

        // Only draft documents are editable at all.
        let is_draft = self
            .exists(
                "SELECT EXISTS (
                    SELECT 1 FROM document_versions
                    WHERE id = $1 AND status = 'draft'
                )",
                &[document_version_id],
            )
            .await?;
        if !is_draft {
            return Ok(Permission::None);
        }

        let is_sysadmin = self
            .exists(
                "SELECT EXISTS (
                    SELECT 1 FROM accounts
                    WHERE id = $1 AND is_sysadmin
                )",
                &[user_id],
            )
            .await?;
        if is_sysadmin {
            return Ok(Permission::Edit);
        }

        let has_manage = self
            .exists(
                "SELECT EXISTS (
                    SELECT 1
                    FROM folder_permissions fp
                    JOIN document_versions dv ON dv.folder_id = fp.folder_id
                    WHERE dv.id = $1 AND fp.account_id = $2 AND fp.may_manage
                )",
                &[document_version_id, user_id],
            )
            .await;
        // Continue on error here: a failed folder lookup must still fall
        // through to the contributor check.
        if matches!(has_manage, Ok(true)) {
            return Ok(Permission::Edit);
        }

        let is_contributor = self
            .exists(
                "SELECT EXISTS (
                    SELECT 1 FROM document_contributors
                    WHERE document_version_id = $1 AND account_id = $2
                )",
                &[document_version_id, user_id],
            )
            .await?;
        if is_contributor {
            return Ok(Permission::Edit);
        }

        Ok(Permission::None)
    }

    async fn save_link(
        &self,
        document_version_id: &str,
        link: &Link,
    ) -> Result<(), RepositoryError> {
        // Avoid duplicate links.
        let exists = self
            .exists(
                "SELECT EXISTS (
                    SELECT 1 FROM document_links
                    WHERE document_version_id = $1 AND link_id = $2 AND link_type = $3
                )",
                &[document_version_id, &link.id, link.kind.as_str()],
            )
            .await?;
        if exists {
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO document_links
                (document_version_id, link_type, link_id, url, title)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(document_version_id)
        .bind(link.kind.as_str())
        .bind(&link.id)
        .bind(&link.url)
        .bind(&link.name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn archive_link(
        &self,
        document_version_id: &str,
        link_id: &str,
        url: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE document_links
             SET archived = NOW()
             WHERE document_version_id = $1 AND link_id = $2 AND url = $3
               AND archived IS NULL",
        )
        .bind(document_version_id)
        .bind(link_id)
        .bind(url)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_comment(&self, comment: &CommentAdd) -> Result<(), RepositoryError> {
        if is_preliminary(&comment.id) {
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO document_comments
                (id, author_id, message, origin, document_version_id)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&comment.id)
        .bind(&comment.author_id)
        .bind(&comment.message)
        .bind(&comment.origin)
        .bind(&comment.document_version_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_comment_done(&self, done: &CommentDone) -> Result<(), RepositoryError> {
        if is_preliminary(&done.id) {
            return Ok(());
        }

        sqlx::query(
            "UPDATE document_comments
             SET done = NOW(), done_by = $2
             WHERE id = $1",
        )
        .bind(&done.id)
        .bind(&done.user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn archive_comment(&self, delete: &CommentDelete) -> Result<(), RepositoryError> {
        if is_preliminary(&delete.id) {
            return Ok(());
        }

        sqlx::query(
            "UPDATE document_comments
             SET archived = NOW(), archived_by = $2
             WHERE id = $1",
        )
        .bind(&delete.id)
        .bind(&delete.user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_comment_reply(&self, reply: &CommentReply) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO document_comment_replies
                (id, comment_id, author_id, message)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&reply.reply_id)
        .bind(&reply.comment_id)
        .bind(&reply.author_id)
        .bind(&reply.message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn archive_comment_reply(
        &self,
        delete: &CommentDeleteReply,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE document_comment_replies
             SET archived = NOW(), archived_by = $3
             WHERE id = $1 AND comment_id = $2 AND author_id = $3",
        )
        .bind(&delete.reply_id)
        .bind(&delete.comment_id)
        .bind(&delete.user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(RepositoryError::NotReplyAuthor);
        }

        Ok(())
    }
}
