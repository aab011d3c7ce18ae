//! Job event publisher.
//!
//! Delivery to the owner's live connection is best effort: an owner with
//! no connected client is not an error, since the job store stays the
//! source of truth and clients can always re-fetch.

use std::sync::Arc;

use genforge_core::alert::OperationalAlert;
use genforge_core::job_events::{
    EVENT_JOB_ALERT, EVENT_JOB_PROGRESS, EVENT_JOB_STATE_CHANGED, MSG_TYPE_JOB_PROGRESS,
    MSG_TYPE_JOB_STATE_CHANGED,
};
use genforge_db::models::job::Job;
use serde_json::json;

use crate::bus::{EventBus, PlatformEvent};
use crate::registry::ConnectionRegistry;

/// Publishes job lifecycle events to owners and to the event bus.
#[derive(Clone)]
pub struct JobNotifier {
    registry: Arc<ConnectionRegistry>,
    bus: Arc<EventBus>,
}

impl JobNotifier {
    pub fn new(registry: Arc<ConnectionRegistry>, bus: Arc<EventBus>) -> Self {
        Self { registry, bus }
    }

    /// Announce that `job` is now in `job.state`.
    ///
    /// The client message carries the public snapshot fields only; the
    /// failure reason is already sanitized by the engine.
    pub async fn job_state_changed(&self, job: &Job) {
        let payload = json!({
            "type": MSG_TYPE_JOB_STATE_CHANGED,
            "job_id": job.id,
            "provider": job.provider_kind,
            "state": job.state,
            "progress": job.progress,
            "failure_reason": job.failure_reason,
            "result_assets": job.result_assets,
        });
        self.deliver(job, EVENT_JOB_STATE_CHANGED, payload).await;
    }

    /// Announce a progress update for a job still in flight.
    pub async fn job_progress(&self, job: &Job, progress: i16) {
        let payload = json!({
            "type": MSG_TYPE_JOB_PROGRESS,
            "job_id": job.id,
            "provider": job.provider_kind,
            "progress": progress,
        });
        self.deliver(job, EVENT_JOB_PROGRESS, payload).await;
    }

    /// Publish an operational alert on the bus. Alerts never reach clients.
    pub fn alert(&self, alert: &OperationalAlert) {
        let payload = serde_json::to_value(alert).unwrap_or_else(|_| json!({}));
        self.bus.publish(
            PlatformEvent::new(EVENT_JOB_ALERT)
                .with_job(alert.provider, alert.job_id)
                .with_payload(payload),
        );
    }

    async fn deliver(&self, job: &Job, event_type: &str, payload: serde_json::Value) {
        let delivered = self
            .registry
            .send_to_owner(job.owner_id, &payload.to_string())
            .await;
        tracing::debug!(
            job_id = %job.id,
            owner_id = job.owner_id,
            event_type,
            delivered,
            "Job event published",
        );

        self.bus.publish(
            PlatformEvent::new(event_type)
                .with_job(job.provider_kind, job.id)
                .with_owner(job.owner_id)
                .with_payload(payload),
        );
    }
}
