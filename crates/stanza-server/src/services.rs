//! Bundle of external service handles.

use std::sync::Arc;

use crate::image::ImageService;
use crate::repository::Repository;
use crate::step_log::StepLog;

/// The external collaborators every room and session needs.
///
/// Cheap to clone; each handle is shared. The concrete backends are chosen
/// at startup (redis/postgres/http in production, in-memory in tests).
#[derive(Clone)]
pub struct Services {
    /// Ephemeral per-document step buffer.
    pub step_log: Arc<dyn StepLog>,

    /// Relational store: permissions, links, comments.
    pub repository: Arc<dyn Repository>,

    /// Image binary owner.
    pub images: Arc<dyn ImageService>,
}

impl Services {
    /// Bundle the three service handles.
    pub fn new(
        step_log: Arc<dyn StepLog>,
        repository: Arc<dyn Repository>,
        images: Arc<dyn ImageService>,
    ) -> Self {
        Self { step_log, repository, images }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
