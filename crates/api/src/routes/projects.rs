//! Route definitions for the `/projects` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::projects;
use crate::state::AppState;

/// Routes mounted at `/projects`.
///
/// ```text
/// GET    /                -> list_projects
/// POST   /                -> create_project
/// GET    /{id}            -> get_project
/// GET    /{id}/status     -> project_status
/// POST   /{id}/cancel     -> cancel_project
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(projects::list_projects).post(projects::create_project))
        .route("/{id}", get(projects::get_project))
        .route("/{id}/status", get(projects::project_status))
        .route("/{id}/cancel", post(projects::cancel_project))
}
