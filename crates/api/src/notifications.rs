//! Event-bus → WebSocket forwarder.
//!
//! Subscribes to the pipeline event bus and mirrors each event to all
//! connected WebSocket clients. Delivery is best-effort: the durable
//! record is the activity timeline in the Project State Store, and clients
//! that miss events fall back to polling the status endpoint.

use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::broadcast;

use nichepress_events::ProjectEvent;

use crate::ws::WsManager;

/// Forwards project events to WebSocket clients.
pub struct EventForwarder {
    ws_manager: Arc<WsManager>,
}

impl EventForwarder {
    pub fn new(ws_manager: Arc<WsManager>) -> Self {
        Self { ws_manager }
    }

    /// Run the forwarding loop.
    ///
    /// Exits when the channel closes (i.e. the
    /// [`EventBus`](nichepress_events::EventBus) is dropped).
    pub async fn run(self, mut receiver: broadcast::Receiver<ProjectEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => self.forward(&event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, forwarder shutting down");
                    break;
                }
            }
        }
    }

    async fn forward(&self, event: &ProjectEvent) {
        let payload = serde_json::json!({
            "type": "project_event",
            "project_id": event.project_id,
            "kind": event.kind,
            "stage": event.stage,
            "description": event.description,
            "payload": event.payload,
            "timestamp": event.timestamp,
        });
        self.ws_manager
            .broadcast(Message::Text(payload.to_string().into()))
            .await;
    }
}
