//! Step inspector: extracts side effects from accepted steps.
//!
//! The inspector never alters a step - the step itself still flows through
//! the accept path untouched. It classifies the encoded payload, decodes the
//! matched shape, and dispatches the embedded operation to the repository or
//! the image service.
//!
//! Failure policy, per operation: permission violations and
//! malformed shapes abort the whole batch; link persistence failures abort
//! too (the link table must not silently drift from the document); comment
//! and image persistence failures are logged and the batch proceeds - a
//! flaky projection must not reject another author's edit.

use serde_json::value::RawValue;
use stanza_core::{
    CommentAdd, CommentDelete, CommentDeleteReply, CommentDone, CommentReply, CustomStep,
    ImageCopy, Link, LinkKind, MarkStep, Permission, ReplaceStep, StepKind, classify,
};
use thiserror::Error;

use crate::repository::RepositoryError;
use crate::services::Services;

/// Errors that abort the current step batch.
#[derive(Debug, Error)]
pub enum InspectorError {
    /// The submitting client does not hold edit permission.
    #[error("no permission to edit the document")]
    PermissionDenied,

    /// A step matched a side-effect shape but did not decode into it.
    #[error("malformed {kind} step: {detail}")]
    Malformed {
        /// Which shape failed to decode.
        kind: &'static str,
        /// Decoder message.
        detail: String,
    },

    /// The link projection could not be persisted.
    #[error(transparent)]
    Store(#[from] RepositoryError),
}

fn malformed(kind: &'static str) -> impl FnOnce(serde_json::Error) -> InspectorError {
    move |e| InspectorError::Malformed { kind, detail: e.to_string() }
}

/// Inspect one step and project its side effects.
///
/// Returns an error only for conditions that must reject the whole batch;
/// best-effort projections log their own failures.
pub async fn inspect_step(
    services: &Services,
    document_id: &str,
    user_id: &str,
    permission: Permission,
    step: &RawValue,
) -> Result<(), InspectorError> {
    // Only editors may change anything, comments included.
    if permission != Permission::Edit {
        return Err(InspectorError::PermissionDenied);
    }

    let raw = step.get();

    match classify(raw) {
        StepKind::AddMark => {
            let mark_step: MarkStep = serde_json::from_str(raw).map_err(malformed("mark"))?;
            project_add_mark(services, document_id, &mark_step).await
        },
        StepKind::RemoveMark => {
            let mark_step: MarkStep = serde_json::from_str(raw).map_err(malformed("mark"))?;
            project_remove_mark(services, document_id, &mark_step).await
        },
        StepKind::CommentCustom => {
            let custom: CustomStep = serde_json::from_str(raw).map_err(malformed("comment"))?;
            project_comment(services, document_id, user_id, &custom).await
        },
        StepKind::PictureCustom => {
            let custom: CustomStep = serde_json::from_str(raw).map_err(malformed("picture"))?;
            project_picture(services, &custom).await
        },
        StepKind::ReplaceSlice => {
            let replace: ReplaceStep = serde_json::from_str(raw).map_err(malformed("replace"))?;
            project_replace(services, document_id, replace);
            Ok(())
        },
        StepKind::Other => Ok(()),
    }
}

async fn project_add_mark(
    services: &Services,
    document_id: &str,
    step: &MarkStep,
) -> Result<(), InspectorError> {
    let attrs = &step.mark.attrs;

    match step.mark.kind.as_str() {
        "file" | "weblink" | "process" => {
            // `process` marks display their process id instead of a name.
            let name = if step.mark.kind == "process" { &attrs.process_id } else { &attrs.name };

            let Some(kind) = LinkKind::from_mark_type(&step.mark.kind) else {
                return Ok(());
            };

            let link = Link {
                id: attrs.id.clone(),
                kind,
                url: attrs.url.clone(),
                name: name.clone(),
            };

            services.repository.save_link(document_id, &link).await.map_err(|e| {
                tracing::debug!(document_id, link_id = %link.id, error = %e, "could not save link");
                InspectorError::Store(e)
            })
        },
        // Comment marks carry no link; the comment itself arrives as a
        // custom step.
        "comment" => Ok(()),
        other => {
            tracing::debug!(mark_type = other, "mark handling not defined");
            Ok(())
        },
    }
}

async fn project_remove_mark(
    services: &Services,
    document_id: &str,
    step: &MarkStep,
) -> Result<(), InspectorError> {
    let attrs = &step.mark.attrs;

    match step.mark.kind.as_str() {
        "file" | "weblink" | "process" => services
            .repository
            .archive_link(document_id, &attrs.id, &attrs.url)
            .await
            .map_err(|e| {
                tracing::debug!(document_id, link_id = %attrs.id, error = %e, "could not archive link");
                InspectorError::Store(e)
            }),
        // Comments outlive their marks.
        "comment" => Ok(()),
        other => {
            tracing::debug!(mark_type = other, "mark handling not defined");
            Ok(())
        },
    }
}

/// Decode a custom step's payload, which must be present.
fn custom_payload<T: serde::de::DeserializeOwned>(
    custom: &CustomStep,
    kind: &'static str,
) -> Result<T, InspectorError> {
    let raw = custom.payload.as_deref().ok_or(InspectorError::Malformed {
        kind,
        detail: "missing payload".to_string(),
    })?;
    serde_json::from_str(raw.get()).map_err(malformed(kind))
}

async fn project_comment(
    services: &Services,
    document_id: &str,
    user_id: &str,
    custom: &CustomStep,
) -> Result<(), InspectorError> {
    // Store failures on comment operations are logged, not propagated: the
    // step is still accepted and broadcast.
    match custom.kind.as_str() {
        "addComment" => {
            let mut comment: CommentAdd = custom_payload(custom, "addComment")?;
            comment.document_version_id = document_id.to_string();
            comment.author_id = user_id.to_string();

            if let Err(e) = services.repository.save_comment(&comment).await {
                tracing::warn!(comment_id = %comment.id, error = %e, "could not add comment");
            }
        },
        "setCommentDone" => {
            let mut done: CommentDone = custom_payload(custom, "setCommentDone")?;
            done.user_id = user_id.to_string();

            if let Err(e) = services.repository.set_comment_done(&done).await {
                tracing::warn!(comment_id = %done.id, error = %e, "could not set comment done");
            }
        },
        "delete" => {
            let mut delete: CommentDelete = custom_payload(custom, "delete")?;
            delete.user_id = user_id.to_string();

            if let Err(e) = services.repository.archive_comment(&delete).await {
                tracing::warn!(comment_id = %delete.id, error = %e, "could not archive comment");
            }
        },
        "replyComment" => {
            let mut reply: CommentReply = custom_payload(custom, "replyComment")?;
            reply.author_id = user_id.to_string();

            if let Err(e) = services.repository.save_comment_reply(&reply).await {
                tracing::warn!(reply_id = %reply.reply_id, error = %e, "could not save reply");
            }
        },
        "deleteCommentReply" => {
            let mut delete: CommentDeleteReply = custom_payload(custom, "deleteCommentReply")?;
            delete.user_id = user_id.to_string();

            if let Err(e) = services.repository.archive_comment_reply(&delete).await {
                tracing::warn!(reply_id = %delete.reply_id, error = %e, "could not archive reply");
            }
        },
        other => {
            tracing::debug!(comment_type = other, "comment handling not defined");
        },
    }

    Ok(())
}

async fn project_picture(services: &Services, custom: &CustomStep) -> Result<(), InspectorError> {
    match custom.kind.as_str() {
        "copyPicture" => {
            let copy: ImageCopy = custom_payload(custom, "copyPicture")?;

            // Best-effort: a failed copy is logged, the step still flows.
            if let Err(e) = services.images.duplicate(&copy.original_id, &copy.image_id).await {
                tracing::warn!(
                    source_id = %copy.original_id,
                    new_id = %copy.image_id,
                    error = %e,
                    "could not copy picture"
                );
            }
            Ok(())
        },
        _ => Ok(()),
    }
}

/// Walk a replace slice for embedded links on a detached task.
///
/// The walk is recursive through nested content and can fan out into many
/// upserts; it runs outside the room handler so a large paste cannot stall
/// step admission. Ordering relative to other accepted steps is therefore
/// not preserved.
fn project_replace(services: &Services, document_id: &str, replace: ReplaceStep) {
    let repository = services.repository.clone();
    let document_id = document_id.to_string();

    tokio::spawn(async move {
        for link in replace.collect_links().into_values() {
            if let Err(e) = repository.save_link(&document_id, &link).await {
                tracing::error!(
                    document_id = %document_id,
                    link_id = %link.id,
                    error = %e,
                    "could not save link"
                );
            }
        }
    });
}
