pub mod health;
pub mod projects;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ws                          WebSocket event stream
///
/// /projects                    list, create
/// /projects/{id}               get
/// /projects/{id}/status        full status snapshot
/// /projects/{id}/cancel        cooperative cancel (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/projects", projects::router())
        .route("/ws", get(ws::handler::ws_handler))
}
