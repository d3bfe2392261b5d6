//! Lifecycle events published by the payload manager.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::manifest::PayloadType;

/// Capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Something that happened to a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PayloadEvent {
    /// The registry was rebuilt from storage.
    Scanned {
        /// Payloads found.
        count: usize,
    },
    /// A payload was written to storage.
    Installed {
        /// Payload id.
        payload_id: String,
        /// Installed version.
        version: String,
    },
    /// A payload was removed from storage.
    Uninstalled {
        /// Payload id.
        payload_id: String,
    },
    /// A payload run began.
    Started {
        /// Payload id.
        payload_id: String,
        /// Execution strategy.
        payload_type: PayloadType,
    },
    /// A run finished on its own.
    Completed {
        /// Payload id.
        payload_id: String,
    },
    /// A run was stopped on request.
    Stopped {
        /// Payload id.
        payload_id: String,
    },
    /// A run failed.
    Failed {
        /// Payload id.
        payload_id: String,
        /// Failure reason.
        reason: String,
    },
    /// A run was stopped by the budget sweep.
    BudgetExceeded {
        /// Payload id.
        payload_id: String,
        /// Which budget and by how much.
        detail: String,
    },
}

/// Fan-out of [`PayloadEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<PayloadEvent>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventSink {
    /// A sink buffering up to `capacity` events per lagging subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Events with no subscriber are dropped.
    pub fn publish(&self, event: PayloadEvent) {
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    /// Subscribe to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PayloadEvent> {
        self.tx.subscribe()
    }
}
