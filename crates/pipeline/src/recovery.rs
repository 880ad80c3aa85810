//! Crash recovery sweep.
//!
//! After a process restart, projects that were mid-pipeline have no driver
//! task. The sweeper periodically finds them and re-attaches a driver,
//! resuming from the first stage that has not completed. `created` projects
//! whose start was interrupted before the driver spawned are started once
//! they have sat untouched for a full sweep interval (the age check keeps
//! the sweeper from racing a launch that is in flight right now).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use nichepress_core::status::ProjectStatus;
use nichepress_core::store::ProjectFilter;

use crate::error::PipelineError;
use crate::manager::PipelineManager;

/// Default interval between recovery sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Re-drives projects that lost their driver task.
pub struct RecoverySweeper {
    manager: Arc<PipelineManager>,
    interval: Duration,
}

impl RecoverySweeper {
    /// Create a sweeper with the default 30-second interval.
    pub fn new(manager: Arc<PipelineManager>) -> Self {
        Self::with_interval(manager, DEFAULT_SWEEP_INTERVAL)
    }

    pub fn with_interval(manager: Arc<PipelineManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Run the sweep loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Recovery sweeper started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Recovery sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(0) => {}
                        Ok(revived) => tracing::info!(revived, "Recovery sweep re-drove projects"),
                        Err(e) => tracing::error!(error = %e, "Recovery sweep failed"),
                    }
                }
            }
        }
    }

    /// One sweep: re-drive every in-flight project without a live driver.
    /// Returns how many drivers were attached.
    pub async fn sweep(&self) -> Result<usize, PipelineError> {
        let mut revived = 0;

        let in_progress = self
            .manager
            .list(ProjectFilter {
                status: Some(ProjectStatus::InProgress),
            })
            .await?;
        for project in in_progress {
            if self.manager.is_running(project.id).await {
                continue;
            }
            tracing::warn!(project_id = %project.id, "Re-driving orphaned project");
            self.manager.resume(project.id).await?;
            revived += 1;
        }

        let stale_before = chrono::Utc::now()
            - chrono::Duration::from_std(self.interval).unwrap_or(chrono::Duration::seconds(30));
        let created = self
            .manager
            .list(ProjectFilter {
                status: Some(ProjectStatus::Created),
            })
            .await?;
        for project in created {
            if project.updated_at >= stale_before || self.manager.is_running(project.id).await {
                continue;
            }
            tracing::warn!(project_id = %project.id, "Starting project stranded before its driver spawned");
            self.manager.start(project.id).await?;
            revived += 1;
        }

        Ok(revived)
    }
}
