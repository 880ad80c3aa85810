use std::sync::Arc;

use nichepress_core::store::ProjectStore;
use nichepress_events::EventBus;
use nichepress_pipeline::PipelineManager;

use crate::config::ServerConfig;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Project State Store backend (in-memory or PostgreSQL).
    pub store: Arc<dyn ProjectStore>,
    /// Pipeline controller driving all projects in this process.
    pub manager: Arc<PipelineManager>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// WebSocket connection manager (browser clients).
    pub ws_manager: Arc<WsManager>,
    /// Live event bus mirrored onto WebSocket connections.
    pub event_bus: Arc<EventBus>,
}
