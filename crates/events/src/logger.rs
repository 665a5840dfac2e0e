//! Background logger for pipeline events.

use tokio::sync::broadcast;

use crate::bus::{PipelineEvent, VARIANT_FAILED};

/// Logs every event published on the bus.
pub struct EventLogger;

impl EventLogger {
    /// Run until the bus is dropped. Returns the number of events logged.
    pub async fn run(mut receiver: broadcast::Receiver<PipelineEvent>) -> u64 {
        let mut logged = 0;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    Self::log(&event);
                    logged += 1;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event logger lagged, some events were not logged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, event logger shutting down");
                    break;
                }
            }
        }
        logged
    }

    fn log(event: &PipelineEvent) {
        if event.event_type == VARIANT_FAILED {
            tracing::warn!(
                event_type = %event.event_type,
                project_id = event.project_id,
                variant_id = ?event.variant_id,
                payload = %event.payload,
                "Pipeline event",
            );
        } else {
            tracing::info!(
                event_type = %event.event_type,
                project_id = event.project_id,
                variant_id = ?event.variant_id,
                payload = %event.payload,
                "Pipeline event",
            );
        }
    }
}
