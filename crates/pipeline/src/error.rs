use nichepress_core::error::CoreError;
use nichepress_core::stage::Stage;
use nichepress_core::store::StoreError;

/// Errors surfaced by the pipeline control surface.
///
/// Stage execution failures are not errors here: they become project state
/// (status `failed` with an error message) and never propagate past the
/// controller.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("No executor registered for stage {0}")]
    MissingExecutor(Stage),
}
