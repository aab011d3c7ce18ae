use std::sync::Arc;
use std::time::Duration;

use genforge_events::ConnectionRegistry;
use tokio_util::sync::CancellationToken;

/// Interval between heartbeat pings (in seconds).
const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Spawn a background task that sends periodic Ping frames to all connected
/// clients until `cancel` fires.
pub fn start_heartbeat(
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Heartbeat stopped");
                    break;
                }
                _ = interval.tick() => {
                    let count = registry.connection_count().await;
                    tracing::debug!(count, "WebSocket heartbeat ping");
                    registry.ping_all().await;
                }
            }
        }
    })
}
