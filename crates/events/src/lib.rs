//! Nichepress in-process event infrastructure.
//!
//! - [`EventBus`]: publish/subscribe hub backed by `tokio::sync::broadcast`.
//! - [`ProjectEvent`]: the live mirror of a persisted activity event.
//!
//! The Project State Store remains the source of truth for the activity
//! timeline; bus delivery is best-effort fan-out for live observers
//! (WebSocket forwarder, log mirrors).

pub mod bus;

pub use bus::{EventBus, ProjectEvent};
