//! Operator sink for `job.alert` events.
//!
//! [`AlertLog`] subscribes to the [`EventBus`](crate::bus::EventBus) and
//! writes every operational alert to the log at `error` level, with the
//! alert's fields as structured fields. Other event types are skipped.

use genforge_core::job_events::EVENT_JOB_ALERT;
use tokio::sync::broadcast;

use crate::bus::PlatformEvent;

/// Background consumer that logs operational alerts.
pub struct AlertLog;

impl AlertLog {
    /// Run the alert loop until the bus is dropped.
    ///
    /// Returns the number of alerts logged.
    pub async fn run(mut receiver: broadcast::Receiver<PlatformEvent>) -> u64 {
        let mut logged = 0;
        loop {
            match receiver.recv().await {
                Ok(event) if event.event_type == EVENT_JOB_ALERT => {
                    Self::log(&event);
                    logged += 1;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Alert log lagged, some events were not inspected");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!(logged, "Event bus closed, alert log shutting down");
                    break;
                }
            }
        }
        logged
    }

    fn log(event: &PlatformEvent) {
        let field = |name: &str| event.payload[name].as_str().unwrap_or_default().to_string();
        tracing::error!(
            alert = %field("kind"),
            provider = ?event.provider,
            job_id = ?event.job_id,
            attempts = event.payload["attempts"].as_u64().unwrap_or_default(),
            last_error = %field("last_error"),
            "Operational alert",
        );
    }
}
