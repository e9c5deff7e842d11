use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::ActivityEvent;

/// Envelope wrapping an activity event with the time it was emitted.
#[derive(Debug, Clone)]
pub struct ActivityEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: ActivityEvent,
}

/// Handle for emitting activity events
///
/// Cheaply cloneable. Events go through a bounded channel to the
/// [`ActivityWriter`](super::ActivityWriter).
#[derive(Clone)]
pub struct ActivityHandle {
    tx: mpsc::Sender<ActivityEnvelope>,
}

impl ActivityHandle {
    pub fn new(tx: mpsc::Sender<ActivityEnvelope>) -> Self {
        Self { tx }
    }

    /// Emit an event, waiting for channel capacity.
    ///
    /// A closed channel is logged, never returned to the caller.
    pub async fn emit(&self, event: ActivityEvent) {
        let envelope = ActivityEnvelope {
            timestamp: Utc::now(),
            event,
        };
        if let Err(e) = self.tx.send(envelope).await {
            tracing::error!("Failed to emit activity event: {}", e);
        }
    }

    /// Emit without waiting. Returns false if the event was dropped.
    pub fn try_emit(&self, event: ActivityEvent) -> bool {
        let envelope = ActivityEnvelope {
            timestamp: Utc::now(),
            event,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to emit activity event: {}", e);
                false
            }
        }
    }

    /// A handle whose events go nowhere.
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }
}
