use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use nichepress_core::error::CoreError;
use nichepress_core::store::StoreError;
use nichepress_pipeline::PipelineError;

/// Application-level error type for HTTP handlers.
///
/// Wraps the domain error families and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `nichepress-core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A Project State Store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A pipeline controller error.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),
            AppError::Store(store) => classify_store_error(store),
            AppError::Pipeline(pipeline) => match pipeline {
                PipelineError::Core(core) => classify_core_error(core),
                PipelineError::Store(store) => classify_store_error(store),
                PipelineError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                PipelineError::MissingExecutor(stage) => {
                    tracing::error!(%stage, "No executor registered for stage");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn classify_core_error(err: &CoreError) -> (StatusCode, &'static str, String) {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}

/// Store failures are fatal to the current operation and surface as 5xx;
/// the in-memory attempt was never acknowledged as committed.
fn classify_store_error(err: &StoreError) -> (StatusCode, &'static str, String) {
    match err {
        StoreError::ProjectNotFound(id) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Project with id {id} not found"),
        ),
        StoreError::DuplicateProject(id) => (
            StatusCode::CONFLICT,
            "CONFLICT",
            format!("Project with id {id} already exists"),
        ),
        StoreError::Backend(msg) => {
            tracing::error!(error = %msg, "Project store backend error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}
