//! Activity event kind constants.
//!
//! Used wherever pipeline progress is recorded on a project timeline or
//! mirrored onto the event bus. Dot-separated, entity-first.

/// Project persisted at intake.
pub const EVENT_PROJECT_CREATED: &str = "project.created";

/// Pipeline claimed the project and began stage execution.
pub const EVENT_PROJECT_STARTED: &str = "project.started";

/// Every stage completed; the site is live.
pub const EVENT_PROJECT_COMPLETED: &str = "project.completed";

/// A stage exhausted its retry budget or failed permanently.
pub const EVENT_PROJECT_FAILED: &str = "project.failed";

/// The project was cancelled by request.
pub const EVENT_PROJECT_CANCELLED: &str = "project.cancelled";

/// A stage began executing.
pub const EVENT_STAGE_STARTED: &str = "stage.started";

/// A stage produced its output.
pub const EVENT_STAGE_COMPLETED: &str = "stage.completed";

/// A stage attempt failed transiently and will be retried.
pub const EVENT_STAGE_RETRYING: &str = "stage.retrying";
