//! In-memory Project State Store.
//!
//! Backs development mode and the test suites. Each project lives behind
//! its own `RwLock`, so writers serialize per project while cross-project
//! operations proceed in parallel. `save` replaces the whole snapshot under
//! the write lock, so readers never observe a torn record.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use nichepress_core::project::{
    ActivityEvent, NewActivityEvent, Project, ProjectSnapshot, StageRecord,
};
use nichepress_core::store::{ProjectFilter, ProjectStore, StoreError};
use nichepress_core::types::ProjectId;

#[derive(Debug, Clone)]
struct Entry {
    project: Project,
    stages: Vec<StageRecord>,
    events: Vec<ActivityEvent>,
    next_seq: i64,
}

/// Volatile [`ProjectStore`] keyed by project id.
#[derive(Default)]
pub struct MemoryStore {
    projects: RwLock<HashMap<ProjectId, Arc<RwLock<Entry>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, id: ProjectId) -> Result<Arc<RwLock<Entry>>, StoreError> {
        self.projects
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::ProjectNotFound(id))
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn create(&self, project: &Project) -> Result<(), StoreError> {
        let mut projects = self.projects.write().await;
        if projects.contains_key(&project.id) {
            return Err(StoreError::DuplicateProject(project.id));
        }
        projects.insert(
            project.id,
            Arc::new(RwLock::new(Entry {
                project: project.clone(),
                stages: Vec::new(),
                events: Vec::new(),
                next_seq: 1,
            })),
        );
        Ok(())
    }

    async fn load(&self, id: ProjectId) -> Result<ProjectSnapshot, StoreError> {
        let cell = self.entry(id).await?;
        let entry = cell.read().await;
        Ok(ProjectSnapshot {
            project: entry.project.clone(),
            stages: entry.stages.clone(),
            events: entry.events.clone(),
        })
    }

    async fn save(&self, project: &Project, stages: &[StageRecord]) -> Result<(), StoreError> {
        let cell = self.entry(project.id).await?;
        let mut entry = cell.write().await;
        entry.project = project.clone();
        entry.stages = stages.to_vec();
        Ok(())
    }

    async fn append_event(
        &self,
        id: ProjectId,
        event: NewActivityEvent,
    ) -> Result<ActivityEvent, StoreError> {
        let cell = self.entry(id).await?;
        let mut entry = cell.write().await;
        let record = ActivityEvent {
            seq: entry.next_seq,
            timestamp: Utc::now(),
            kind: event.kind,
            stage: event.stage,
            description: event.description,
        };
        entry.next_seq += 1;
        entry.events.push(record.clone());
        Ok(record)
    }

    async fn list(&self, filter: ProjectFilter) -> Result<Vec<Project>, StoreError> {
        let projects = self.projects.read().await;
        let mut out = Vec::with_capacity(projects.len());
        for cell in projects.values() {
            let entry = cell.read().await;
            if filter
                .status
                .map_or(true, |status| entry.project.status == status)
            {
                out.push(entry.project.clone());
            }
        }
        // Newest first; UUIDv7 ids break creation-time ties deterministically.
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }
}
