//! Handlers for the `/projects` resource.
//!
//! Thin translation layer: validation at the boundary, then straight into
//! the pipeline manager. Stage failures never surface here; they become
//! project state visible through the status endpoint.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use nichepress_core::project::{ActivityEvent, Preferences, Project, StageRecord};
use nichepress_core::store::ProjectFilter;
use nichepress_core::types::ProjectId;
use nichepress_pipeline::CancelOutcome;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

/// Body for `POST /api/v1/projects`.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateProjectRequest {
    /// The blog topic or niche, e.g. "fitness blog".
    #[validate(length(min = 1, max = 200, message = "topic must be 1-200 characters"))]
    pub topic: String,
    #[serde(default)]
    pub preferences: Preferences,
}

/// Full status payload: the project plus its stage map and timeline.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub project: Project,
    pub stages: Vec<StageRecord>,
    pub activity: Vec<ActivityEvent>,
}

/// Result of a cancel request.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub outcome: CancelOutcome,
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/projects
///
/// Validate intake, persist the project, and start its pipeline. Returns
/// 201 with the (already in-progress) project; stage execution proceeds in
/// the background.
pub async fn create_project(
    State(state): State<AppState>,
    Json(input): Json<CreateProjectRequest>,
) -> AppResult<impl IntoResponse> {
    input
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let project = state.manager.launch(input.topic, input.preferences).await?;

    tracing::info!(
        project_id = %project.id,
        topic = %project.topic,
        "Project created and pipeline started",
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: project })))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/projects
///
/// List projects, newest first. Supports an optional `status` query
/// parameter (`?status=failed`).
pub async fn list_projects(
    State(state): State<AppState>,
    Query(filter): Query<ProjectFilter>,
) -> AppResult<impl IntoResponse> {
    let projects = state.manager.list(filter).await?;
    Ok(Json(DataResponse { data: projects }))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/projects/{id}
///
/// The project row alone; use `/status` for stages and timeline.
pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> AppResult<impl IntoResponse> {
    let snapshot = state.manager.status(project_id).await?;
    Ok(Json(DataResponse {
        data: snapshot.project,
    }))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// GET /api/v1/projects/{id}/status
///
/// Read-only snapshot: status, current stage, progress, the per-stage
/// status map, and the activity timeline in chronological order. Always a
/// coherent snapshot, even while the driver is writing.
pub async fn project_status(
    State(state): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> AppResult<impl IntoResponse> {
    let snapshot = state.manager.status(project_id).await?;
    Ok(Json(DataResponse {
        data: StatusResponse {
            project: snapshot.project,
            stages: snapshot.stages,
            activity: snapshot.events,
        },
    }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/projects/{id}/cancel
///
/// Cooperative cancellation. Idempotent: cancelling a created or terminal
/// project is a no-op success, not an error. The in-flight stage may
/// finish its current unit of work before the signal is honored.
pub async fn cancel_project(
    State(state): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> AppResult<impl IntoResponse> {
    let outcome = state.manager.cancel(project_id).await?;

    tracing::info!(%project_id, ?outcome, "Cancel requested");

    Ok(Json(DataResponse {
        data: CancelResponse { outcome },
    }))
}
