//! Provider-pushed notifications.

use genforge_core::job::JobState;
use genforge_core::types::JobId;
use genforge_providers::RawNotification;

use super::transitions::StatusUpdate;
use super::GenerationEngine;
use crate::error::StoreError;

/// Why a well-formed notification changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No job of this provider carries the remote id.
    UnknownRemoteId,
    /// The job already left Submitted, possibly through a concurrent poll.
    AlreadySettled,
}

/// Result of handling one pushed notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// The job moved to `state`.
    Applied { job_id: JobId, state: JobState },
    /// The job is still running; its progress was recorded.
    ProgressRecorded { job_id: JobId },
    /// Nothing to do; acknowledge to the provider.
    Ignored(IgnoreReason),
    /// Unauthenticated or unparseable; nothing was read from the store.
    Dropped { reason: String },
}

impl GenerationEngine {
    /// Parse and apply a notification pushed by this engine's provider.
    ///
    /// Returns an error only when the store fails, in which case the
    /// provider should redeliver.
    pub async fn handle_notification(
        &self,
        raw: &RawNotification,
    ) -> Result<IntakeOutcome, StoreError> {
        let notification = match self.adapter.parse_notification(raw) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(provider = %self.kind, error = %e, "Dropping notification");
                return Ok(IntakeOutcome::Dropped {
                    reason: e.to_string(),
                });
            }
        };

        let Some(job) = self
            .ctx
            .store
            .find_by_remote_id(self.kind, &notification.remote_id)
            .await?
        else {
            tracing::info!(
                provider = %self.kind,
                remote_id = %notification.remote_id,
                "Notification for unknown remote id",
            );
            return Ok(IntakeOutcome::Ignored(IgnoreReason::UnknownRemoteId));
        };

        if job.state.is_settled() {
            tracing::debug!(job_id = %job.id, state = %job.state, "Notification for settled job");
            return Ok(IntakeOutcome::Ignored(IgnoreReason::AlreadySettled));
        }

        Ok(
            match self.apply_remote_status(&job, notification.status, "push").await? {
                StatusUpdate::Advanced(updated) => IntakeOutcome::Applied {
                    job_id: updated.id,
                    state: updated.state,
                },
                StatusUpdate::Progress { recorded: true } => {
                    IntakeOutcome::ProgressRecorded { job_id: job.id }
                }
                StatusUpdate::Progress { recorded: false } | StatusUpdate::Unchanged => {
                    IntakeOutcome::Ignored(IgnoreReason::AlreadySettled)
                }
            },
        )
    }
}
