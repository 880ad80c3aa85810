//! The stage executor contract.
//!
//! Every stage (LLM-backed research, content generation, WordPress
//! publishing) implements the same narrow interface, which is what keeps
//! the controller independent of how any particular stage does its work.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use nichepress_core::project::Preferences;
use nichepress_core::stage::Stage;
use nichepress_core::types::ProjectId;

/// Everything a stage executor may read: the intake data, the outputs of
/// every completed predecessor stage, and the cancellation token it must
/// observe between units of work.
#[derive(Clone)]
pub struct StageContext {
    pub project_id: ProjectId,
    pub topic: String,
    pub preferences: Preferences,
    /// Outputs of completed predecessor stages, keyed by stage.
    pub outputs: Arc<BTreeMap<Stage, serde_json::Value>>,
    /// Cancellation is cooperative: an executor should check this between
    /// units of work. An in-flight unit is allowed to finish first.
    pub cancel: CancellationToken,
}

/// Error surface of a stage executor.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Worth retrying: network failures, rate limits, upstream timeouts.
    #[error("{0}")]
    Transient(String),

    /// Not worth retrying: invalid credentials, malformed configuration.
    /// Fails the stage (and the project) immediately.
    #[error("{0}")]
    Permanent(String),
}

impl StageError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }
}

/// One unit of pipeline work.
///
/// Executors must be idempotent under retry: a repeated call after a
/// transient failure must not duplicate external side effects (no second
/// WordPress post). Idempotency keys are the executor's responsibility;
/// the controller only distinguishes transient from permanent failures.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, ctx: StageContext) -> Result<serde_json::Value, StageError>;
}
