//! Per-project pipeline driver.
//!
//! One runner task drives one project; stages run strictly in order because
//! each stage's input is the prior stage's output. Concurrency exists only
//! across projects. Every state transition is persisted before it is
//! considered committed; a store failure aborts the run without a terminal
//! transition so the recovery sweeper can re-drive the project later.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use nichepress_core::activity::{
    EVENT_PROJECT_CANCELLED, EVENT_PROJECT_COMPLETED, EVENT_PROJECT_FAILED, EVENT_STAGE_COMPLETED,
    EVENT_STAGE_RETRYING, EVENT_STAGE_STARTED,
};
use nichepress_core::progress;
use nichepress_core::project::{NewActivityEvent, Project, StageRecord};
use nichepress_core::stage::Stage;
use nichepress_core::status::{ProjectStatus, StageStatus};
use nichepress_core::store::{ProjectStore, StoreError};
use nichepress_core::types::ProjectId;
use nichepress_events::{EventBus, ProjectEvent};

use crate::config::PipelineConfig;
use crate::executor::{StageContext, StageError};
use crate::registry::ExecutorRegistry;

/// Outcome of running a single stage to its local conclusion.
enum StageOutcome {
    Completed(serde_json::Value),
    Failed(String),
    Cancelled,
}

pub(crate) struct ProjectRunner {
    store: Arc<dyn ProjectStore>,
    registry: Arc<ExecutorRegistry>,
    bus: Arc<EventBus>,
    config: PipelineConfig,
}

impl ProjectRunner {
    pub(crate) fn new(
        store: Arc<dyn ProjectStore>,
        registry: Arc<ExecutorRegistry>,
        bus: Arc<EventBus>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            bus,
            config,
        }
    }

    /// Drive the project to a terminal state or until cancelled.
    pub(crate) async fn drive(&self, project_id: ProjectId, cancel: CancellationToken) {
        if let Err(e) = self.run(project_id, &cancel).await {
            tracing::error!(
                %project_id,
                error = %e,
                "Pipeline driver aborted on store failure; project left for recovery",
            );
        }
    }

    async fn run(&self, project_id: ProjectId, cancel: &CancellationToken) -> Result<(), StoreError> {
        let snapshot = self.store.load(project_id).await?;
        let mut project = snapshot.project;
        let mut stages = snapshot.stages;

        for idx in 0..stages.len() {
            // Resume path: completed predecessors are not re-run.
            if stages[idx].status == StageStatus::Completed {
                continue;
            }
            if cancel.is_cancelled() {
                return self.finalize_cancelled(&mut project, &mut stages).await;
            }

            self.begin_stage(&mut project, &mut stages, idx).await?;

            match self.run_stage(&project, &mut stages, idx, cancel).await {
                StageOutcome::Completed(output) => {
                    self.complete_stage(&mut project, &mut stages, idx, output)
                        .await?;
                }
                StageOutcome::Failed(error) => {
                    return self
                        .finalize_failed(&mut project, &mut stages, idx, error)
                        .await;
                }
                StageOutcome::Cancelled => {
                    return self.finalize_cancelled(&mut project, &mut stages).await;
                }
            }
        }

        self.finalize_completed(&mut project, &mut stages).await
    }

    /// Mark a stage in progress and make the transition durable.
    async fn begin_stage(
        &self,
        project: &mut Project,
        stages: &mut [StageRecord],
        idx: usize,
    ) -> Result<(), StoreError> {
        let stage = stages[idx].stage;
        let now = Utc::now();

        stages[idx].status = StageStatus::InProgress;
        stages[idx].started_at = Some(now);
        project.current_stage = Some(stage);
        project.updated_at = now;

        self.store.save(project, stages).await?;
        self.record_event(
            project.id,
            EVENT_STAGE_STARTED,
            Some(stage),
            format!("Started stage {stage}"),
            serde_json::Value::Null,
        )
        .await?;

        tracing::info!(project_id = %project.id, %stage, "Stage started");
        Ok(())
    }

    /// Run one stage through its attempt budget.
    ///
    /// Retry events are recorded best-effort; an event append failure here
    /// is logged rather than aborting a stage that is otherwise healthy.
    async fn run_stage(
        &self,
        project: &Project,
        stages: &mut [StageRecord],
        idx: usize,
        cancel: &CancellationToken,
    ) -> StageOutcome {
        let stage = stages[idx].stage;
        let Some(executor) = self.registry.get(stage) else {
            // The registry is checked at startup; this is a wiring bug.
            return StageOutcome::Failed(format!("no executor registered for stage {stage}"));
        };

        let ctx = StageContext {
            project_id: project.id,
            topic: project.topic.clone(),
            preferences: project.preferences.clone(),
            outputs: Arc::new(completed_outputs(stages)),
            cancel: cancel.clone(),
        };

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            stages[idx].attempts = attempt;

            let execution = executor.execute(ctx.clone());
            let result = tokio::select! {
                _ = cancel.cancelled() => return StageOutcome::Cancelled,
                result = tokio::time::timeout(self.config.stage_timeout, execution) => result,
            };

            let error = match result {
                Ok(Ok(output)) => return StageOutcome::Completed(output),
                Ok(Err(StageError::Permanent(message))) => {
                    tracing::error!(project_id = %project.id, %stage, error = %message, "Stage failed permanently");
                    return StageOutcome::Failed(message);
                }
                Ok(Err(StageError::Transient(message))) => message,
                Err(_) => format!(
                    "stage timed out after {}s",
                    self.config.stage_timeout.as_secs()
                ),
            };

            if attempt >= max_attempts {
                return StageOutcome::Failed(format!("{error} (after {attempt} attempts)"));
            }

            let delay = self.config.backoff_delay(attempt);
            tracing::warn!(
                project_id = %project.id,
                %stage,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Stage attempt failed, retrying",
            );
            if let Err(e) = self
                .record_event(
                    project.id,
                    EVENT_STAGE_RETRYING,
                    Some(stage),
                    format!("Attempt {attempt} of stage {stage} failed: {error}; retrying"),
                    serde_json::json!({ "attempt": attempt }),
                )
                .await
            {
                tracing::error!(project_id = %project.id, error = %e, "Failed to record retry event");
            }

            tokio::select! {
                _ = cancel.cancelled() => return StageOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Persist a completed stage and the recomputed progress.
    async fn complete_stage(
        &self,
        project: &mut Project,
        stages: &mut [StageRecord],
        idx: usize,
        output: serde_json::Value,
    ) -> Result<(), StoreError> {
        let stage = stages[idx].stage;
        let now = Utc::now();

        stages[idx].status = StageStatus::Completed;
        stages[idx].finished_at = Some(now);
        stages[idx].output = Some(output);

        let completed = stages
            .iter()
            .filter(|record| record.status == StageStatus::Completed)
            .count();
        project.progress = progress::percent(completed, stages.len());
        project.updated_at = now;

        self.store.save(project, stages).await?;
        self.record_event(
            project.id,
            EVENT_STAGE_COMPLETED,
            Some(stage),
            format!("Completed stage {stage} ({}%)", project.progress),
            serde_json::json!({ "progress": project.progress }),
        )
        .await?;

        tracing::info!(
            project_id = %project.id,
            %stage,
            progress = project.progress,
            "Stage completed",
        );
        Ok(())
    }

    /// All stages done: mark the project completed and lift the site URL
    /// out of the publishing stage's output.
    async fn finalize_completed(
        &self,
        project: &mut Project,
        stages: &mut [StageRecord],
    ) -> Result<(), StoreError> {
        project.status = ProjectStatus::Completed;
        project.progress = 100;
        project.current_stage = None;
        project.deployment_url = deployment_url(stages);
        project.updated_at = Utc::now();

        self.store.save(project, stages).await?;
        self.record_event(
            project.id,
            EVENT_PROJECT_COMPLETED,
            None,
            match &project.deployment_url {
                Some(url) => format!("Project completed; site live at {url}"),
                None => "Project completed".to_string(),
            },
            serde_json::json!({ "deployment_url": project.deployment_url }),
        )
        .await?;

        tracing::info!(
            project_id = %project.id,
            deployment_url = project.deployment_url.as_deref().unwrap_or(""),
            "Project completed",
        );
        Ok(())
    }

    /// A stage exhausted its retries or failed permanently: halt the
    /// pipeline. Downstream records stay pending; current_stage keeps
    /// pointing at the failed stage.
    async fn finalize_failed(
        &self,
        project: &mut Project,
        stages: &mut [StageRecord],
        idx: usize,
        error: String,
    ) -> Result<(), StoreError> {
        let stage = stages[idx].stage;
        let now = Utc::now();

        stages[idx].status = StageStatus::Failed;
        stages[idx].finished_at = Some(now);
        stages[idx].error = Some(error.clone());

        project.status = ProjectStatus::Failed;
        project.error = Some(format!("Stage {stage} failed: {error}"));
        project.updated_at = now;

        self.store.save(project, stages).await?;
        self.record_event(
            project.id,
            EVENT_PROJECT_FAILED,
            Some(stage),
            format!("Project failed at stage {stage}: {error}"),
            serde_json::Value::Null,
        )
        .await?;

        tracing::error!(project_id = %project.id, %stage, error = %error, "Project failed");
        Ok(())
    }

    /// Cooperative cancellation observed: skip everything that has not
    /// completed and record the terminal event. Nothing is appended to the
    /// timeline afterwards.
    pub(crate) async fn finalize_cancelled(
        &self,
        project: &mut Project,
        stages: &mut [StageRecord],
    ) -> Result<(), StoreError> {
        let now = Utc::now();

        for record in stages.iter_mut() {
            match record.status {
                StageStatus::InProgress => {
                    record.status = StageStatus::Skipped;
                    record.finished_at = Some(now);
                }
                StageStatus::Pending => {
                    record.status = StageStatus::Skipped;
                }
                _ => {}
            }
        }

        project.status = ProjectStatus::Cancelled;
        project.current_stage = None;
        project.updated_at = now;

        self.store.save(project, stages).await?;
        self.record_event(
            project.id,
            EVENT_PROJECT_CANCELLED,
            None,
            "Project cancelled".to_string(),
            serde_json::Value::Null,
        )
        .await?;

        tracing::info!(project_id = %project.id, "Project cancelled");
        Ok(())
    }

    /// Append to the durable timeline, then mirror onto the event bus.
    async fn record_event(
        &self,
        project_id: ProjectId,
        kind: &str,
        stage: Option<Stage>,
        description: String,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        let event = self
            .store
            .append_event(project_id, NewActivityEvent::new(kind, stage, description))
            .await?;

        let mut live = ProjectEvent::new(project_id, event.kind.clone())
            .with_description(event.description.clone());
        if let Some(stage) = stage {
            live = live.with_stage(stage);
        }
        if !payload.is_null() {
            live = live.with_payload(payload);
        }
        self.bus.publish(live);
        Ok(())
    }
}

/// Outputs of completed stages, keyed by stage.
fn completed_outputs(stages: &[StageRecord]) -> BTreeMap<Stage, serde_json::Value> {
    stages
        .iter()
        .filter(|record| record.status == StageStatus::Completed)
        .filter_map(|record| record.output.clone().map(|output| (record.stage, output)))
        .collect()
}

/// The last stage output (in pipeline order) carrying a `deployment_url`.
fn deployment_url(stages: &[StageRecord]) -> Option<String> {
    stages.iter().rev().find_map(|record| {
        record
            .output
            .as_ref()
            .and_then(|output| output.get("deployment_url"))
            .and_then(|value| value.as_str())
            .map(str::to_owned)
    })
}
