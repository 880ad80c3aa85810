//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the central publish/subscribe hub for [`ProjectEvent`]s.
//! It is designed to be shared via `Arc<EventBus>` across the application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use nichepress_core::stage::Stage;
use nichepress_core::types::ProjectId;

// ---------------------------------------------------------------------------
// ProjectEvent
// ---------------------------------------------------------------------------

/// A pipeline event for one project.
///
/// Constructed via [`ProjectEvent::new`] and enriched with the builder
/// methods [`with_stage`](ProjectEvent::with_stage),
/// [`with_description`](ProjectEvent::with_description), and
/// [`with_payload`](ProjectEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEvent {
    /// The project this event belongs to.
    pub project_id: ProjectId,

    /// Dot-separated event kind, e.g. `"stage.completed"`.
    pub kind: String,

    /// The pipeline stage the event refers to, if any.
    pub stage: Option<Stage>,

    /// Human-readable description, mirrored from the activity timeline.
    pub description: String,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl ProjectEvent {
    /// Create a new event with only the required project id and kind.
    ///
    /// All optional fields default to `None` / empty.
    pub fn new(project_id: ProjectId, kind: impl Into<String>) -> Self {
        Self {
            project_id,
            kind: kind.into(),
            stage: None,
            description: String::new(),
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Attach the pipeline stage the event refers to.
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Set the human-readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the JSON payload for the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`ProjectEvent`].
///
/// # Usage
///
/// ```rust
/// use nichepress_events::bus::{EventBus, ProjectEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(ProjectEvent::new(uuid::Uuid::now_v7(), "project.started"));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<ProjectEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped;
    /// the activity timeline in the state store is the durable record.
    pub fn publish(&self, event: ProjectEvent) {
        // Ignore the SendError — it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
