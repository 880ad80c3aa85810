//! Pipeline manager: the control surface over per-project driver tasks.
//!
//! One manager owns every running driver in the process. All mutations of
//! a project's state happen inside its single driver task (or, for
//! orphaned projects, under the manager's direct finalization), which is
//! what enforces the one-writer-per-project discipline.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use nichepress_core::activity::{EVENT_PROJECT_CREATED, EVENT_PROJECT_STARTED};
use nichepress_core::project::{self, NewActivityEvent, Preferences, Project, ProjectSnapshot, StageRecord};
use nichepress_core::stage::Stage;
use nichepress_core::status::ProjectStatus;
use nichepress_core::store::{ProjectFilter, ProjectStore};
use nichepress_core::types::ProjectId;
use nichepress_events::{EventBus, ProjectEvent};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::registry::ExecutorRegistry;
use crate::runner::ProjectRunner;

struct DriverHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// What a cancel request actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// A running driver was signalled; it will finalize shortly.
    Signalled,
    /// No driver was alive; the project was finalized to cancelled directly.
    Finalized,
    /// The project was already terminal or never started; nothing to do.
    NoOp,
}

/// Sequences the fixed stage pipeline across all projects in the process.
pub struct PipelineManager {
    store: Arc<dyn ProjectStore>,
    registry: Arc<ExecutorRegistry>,
    bus: Arc<EventBus>,
    config: PipelineConfig,
    drivers: Mutex<HashMap<ProjectId, DriverHandle>>,
}

impl PipelineManager {
    /// Build a manager over a complete executor registry.
    ///
    /// Fails fast if any pipeline stage has no executor; a registry hole
    /// must never surface mid-run.
    pub fn new(
        store: Arc<dyn ProjectStore>,
        registry: Arc<ExecutorRegistry>,
        bus: Arc<EventBus>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        registry.ensure_complete()?;
        Ok(Self {
            store,
            registry,
            bus,
            config,
            drivers: Mutex::new(HashMap::new()),
        })
    }

    /// Validate intake, persist the project, and start its pipeline.
    ///
    /// Returns the (already in-progress) project immediately; stages run in
    /// the background.
    pub async fn launch(
        &self,
        topic: String,
        preferences: Preferences,
    ) -> Result<Project, PipelineError> {
        project::validate_topic(&topic)?;
        preferences.validate()?;

        let created = Project::new(topic, preferences, chrono::Utc::now());
        self.store.create(&created).await?;
        let event = self
            .store
            .append_event(
                created.id,
                NewActivityEvent::new(
                    EVENT_PROJECT_CREATED,
                    None,
                    format!("Created project for topic \"{}\"", created.topic),
                ),
            )
            .await?;
        self.bus.publish(
            ProjectEvent::new(created.id, event.kind.clone()).with_description(event.description),
        );

        self.start(created.id).await
    }

    /// Claim a `created` project: mark it in progress, lay down one pending
    /// stage record per pipeline stage, and spawn the driver. Non-blocking.
    pub async fn start(&self, project_id: ProjectId) -> Result<Project, PipelineError> {
        let snapshot = self.store.load(project_id).await?;
        let mut project = snapshot.project;

        if project.status != ProjectStatus::Created {
            return Err(PipelineError::Conflict(format!(
                "project {project_id} is {} and cannot be started",
                project.status
            )));
        }

        let stages: Vec<StageRecord> = Stage::ALL.iter().map(|s| StageRecord::pending(*s)).collect();
        project.status = ProjectStatus::InProgress;
        project.current_stage = Some(Stage::Requirements);
        project.updated_at = chrono::Utc::now();

        self.store.save(&project, &stages).await?;
        let event = self
            .store
            .append_event(
                project_id,
                NewActivityEvent::new(EVENT_PROJECT_STARTED, None, "Pipeline started"),
            )
            .await?;
        self.bus.publish(
            ProjectEvent::new(project_id, event.kind.clone()).with_description(event.description),
        );

        self.spawn_driver(project_id).await;
        tracing::info!(%project_id, topic = %project.topic, "Project started");
        Ok(project)
    }

    /// Re-attach a driver to an in-progress project that lost its task
    /// (process restart). The driver resumes from the first stage that has
    /// not completed.
    pub async fn resume(&self, project_id: ProjectId) -> Result<(), PipelineError> {
        let snapshot = self.store.load(project_id).await?;
        if snapshot.project.status != ProjectStatus::InProgress {
            return Err(PipelineError::Conflict(format!(
                "project {project_id} is {} and cannot be resumed",
                snapshot.project.status
            )));
        }
        if self.is_running(project_id).await {
            return Err(PipelineError::Conflict(format!(
                "project {project_id} already has a live driver"
            )));
        }

        self.spawn_driver(project_id).await;
        tracing::info!(%project_id, "Project driver resumed");
        Ok(())
    }

    /// Cooperatively cancel a project. Idempotent: cancelling a created or
    /// already-terminal project is a no-op success.
    pub async fn cancel(&self, project_id: ProjectId) -> Result<CancelOutcome, PipelineError> {
        let snapshot = self.store.load(project_id).await?;
        if !snapshot.project.status.is_cancellable() {
            return Ok(CancelOutcome::NoOp);
        }

        // Signal the live driver if there is one; it finalizes the state.
        {
            let drivers = self.drivers.lock().await;
            if let Some(handle) = drivers.get(&project_id) {
                if !handle.task.is_finished() {
                    handle.cancel.cancel();
                    tracing::info!(%project_id, "Cancellation signalled to driver");
                    return Ok(CancelOutcome::Signalled);
                }
            }
        }

        // Orphaned in-flight project (e.g. after a restart): finalize here.
        // Re-load after the driver probe: the driver may have finished
        // between the first load and now.
        let snapshot = self.store.load(project_id).await?;
        if !snapshot.project.status.is_cancellable() {
            return Ok(CancelOutcome::NoOp);
        }
        let mut project = snapshot.project;
        let mut stages = snapshot.stages;
        self.runner()
            .finalize_cancelled(&mut project, &mut stages)
            .await?;
        Ok(CancelOutcome::Finalized)
    }

    /// Read-only snapshot for the status surface. No side effects.
    pub async fn status(&self, project_id: ProjectId) -> Result<ProjectSnapshot, PipelineError> {
        Ok(self.store.load(project_id).await?)
    }

    /// List projects, optionally filtered by status.
    pub async fn list(&self, filter: ProjectFilter) -> Result<Vec<Project>, PipelineError> {
        Ok(self.store.list(filter).await?)
    }

    /// Is a driver task currently alive for this project?
    pub async fn is_running(&self, project_id: ProjectId) -> bool {
        self.drivers
            .lock()
            .await
            .get(&project_id)
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }

    /// Await the driver for a project, if any. Used by tests and shutdown
    /// paths that need the terminal state to be durable.
    pub async fn join(&self, project_id: ProjectId) {
        let handle = self.drivers.lock().await.remove(&project_id);
        if let Some(handle) = handle {
            let _ = handle.task.await;
        }
    }

    /// Abort all driver tasks without cancelling their projects.
    ///
    /// Interrupted projects stay `in_progress` and are re-driven by the
    /// recovery sweeper on the next startup; this is the graceful-shutdown
    /// path, distinct from user-requested cancellation.
    pub async fn shutdown(&self) {
        let mut drivers = self.drivers.lock().await;
        let count = drivers.len();
        for (_, handle) in drivers.drain() {
            handle.task.abort();
        }
        if count > 0 {
            tracing::info!(count, "Aborted in-flight pipeline drivers");
        }
    }

    fn runner(&self) -> ProjectRunner {
        ProjectRunner::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.bus),
            self.config.clone(),
        )
    }

    async fn spawn_driver(&self, project_id: ProjectId) {
        let cancel = CancellationToken::new();
        let runner = self.runner();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            runner.drive(project_id, token).await;
        });

        // A finished handle may linger from a previous run of this project.
        self.drivers
            .lock()
            .await
            .insert(project_id, DriverHandle { cancel, task });
    }
}
