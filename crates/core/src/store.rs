//! The Project State Store contract.
//!
//! Every durable mutation of a project flows through [`ProjectStore`].
//! Implementations must serialize writes per project (concurrent writers to
//! different projects proceed in parallel) and keep `save` atomic, so a
//! reader never observes a project row paired with stage records from a
//! previous transition.

use async_trait::async_trait;

use crate::project::{ActivityEvent, NewActivityEvent, Project, ProjectSnapshot, StageRecord};
use crate::status::ProjectStatus;
use crate::types::ProjectId;

/// Errors surfaced by a store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Project {0} already exists")]
    DuplicateProject(ProjectId),

    #[error("Project {0} not found")]
    ProjectNotFound(ProjectId),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Optional filters for project listings.
#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
pub struct ProjectFilter {
    pub status: Option<ProjectStatus>,
}

/// Durable persistence for projects, their stage records, and their
/// append-only activity timeline.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Insert a new project with no stage records yet.
    async fn create(&self, project: &Project) -> Result<(), StoreError>;

    /// Load a coherent snapshot of the project, its stage records in
    /// pipeline order, and its events in (timestamp, seq) order.
    async fn load(&self, id: ProjectId) -> Result<ProjectSnapshot, StoreError>;

    /// Atomically persist the project row together with its stage records.
    ///
    /// A transition is not considered committed until this returns Ok
    /// (write-then-acknowledge).
    async fn save(&self, project: &Project, stages: &[StageRecord]) -> Result<(), StoreError>;

    /// Append an activity event; the store assigns sequence and timestamp.
    ///
    /// Safe under concurrent appenders: sequences are monotonically
    /// increasing per project and never reused.
    async fn append_event(
        &self,
        id: ProjectId,
        event: NewActivityEvent,
    ) -> Result<ActivityEvent, StoreError>;

    /// List projects, optionally filtered by status, newest first.
    async fn list(&self, filter: ProjectFilter) -> Result<Vec<Project>, StoreError>;
}
