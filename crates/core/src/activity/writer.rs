use std::sync::Arc;

use tokio::sync::mpsc;

use super::{ActivityEnvelope, ActivityHandle, ActivityRecord, ActivityStore};

/// Background task that writes activity events to storage
pub struct ActivityWriter {
    rx: mpsc::Receiver<ActivityEnvelope>,
    store: Arc<dyn ActivityStore>,
}

impl ActivityWriter {
    pub fn new(rx: mpsc::Receiver<ActivityEnvelope>, store: Arc<dyn ActivityStore>) -> Self {
        Self { rx, store }
    }

    /// Run the writer until every handle is dropped
    pub async fn run(mut self) {
        tracing::info!("Activity writer started");

        while let Some(envelope) = self.rx.recv().await {
            let record = ActivityRecord {
                id: 0, // Set by the store
                timestamp: envelope.timestamp,
                event: envelope.event,
            };

            if let Err(e) = self.store.insert(&record) {
                tracing::error!("Failed to write activity event: {}", e);
            }
        }

        tracing::info!("Activity writer shutting down");
    }
}

/// Create the activity pipeline
///
/// Returns the handle to clone into producers and the writer to spawn with
/// `tokio::spawn(writer.run())`.
pub fn create_activity_system(
    store: Arc<dyn ActivityStore>,
    buffer_size: usize,
) -> (ActivityHandle, ActivityWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let handle = ActivityHandle::new(tx);
    let writer = ActivityWriter::new(rx, store);
    (handle, writer)
}
