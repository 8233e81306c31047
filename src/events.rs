//! Outbound notifications for the UI layer

use serde::Serialize;
use tokio::sync::broadcast;

use crate::session::SessionState;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    SessionStateChanged { state: SessionState },
    EndedDueToIdle,
}

/// Fan-out of tracker events; sending never blocks and never fails the caller
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TrackerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: TrackerEvent) {
        tracing::debug!(event = ?event, "Tracker event");
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
