//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the orchestrator,
//! which publishes, and any number of subscribers.

use chrono::{DateTime, Utc};
use posecraft_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

pub const VARIANT_STARTED: &str = "variant.started";
pub const VARIANT_COMPLETED: &str = "variant.completed";
pub const VARIANT_FAILED: &str = "variant.failed";
pub const PROJECT_COMPLETED: &str = "project.completed";
pub const PROJECT_CANCELLED: &str = "project.cancelled";

// ---------------------------------------------------------------------------
// PipelineEvent
// ---------------------------------------------------------------------------

/// Something that happened while running a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Dot-separated event name, e.g. `"variant.completed"`.
    pub event_type: String,

    pub project_id: DbId,

    /// Set for `variant.*` events.
    pub variant_id: Option<DbId>,

    /// Event-specific data.
    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    /// Create an event for a project with an empty payload.
    pub fn new(event_type: impl Into<String>, project_id: DbId) -> Self {
        Self {
            event_type: event_type.into(),
            project_id,
            variant_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_variant(mut self, variant_id: DbId) -> Self {
        self.variant_id = Some(variant_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use posecraft_events::bus::{EventBus, PipelineEvent, PROJECT_COMPLETED};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(PipelineEvent::new(PROJECT_COMPLETED, 1));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest unread events are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped when nobody listens.
    pub fn publish(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
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
