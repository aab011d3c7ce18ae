//! Transition helpers shared by the dispatcher, reconciler and intake.
//!
//! Only the writer whose compare-and-set wins performs the follow-up
//! effects (refund, notification, retrieval handoff), so a poll and a push
//! racing on the same job settle it exactly once.

use chrono::Utc;
use genforge_core::alert::{AlertKind, OperationalAlert};
use genforge_core::asset::AssetRef;
use genforge_core::job::Transition;
use genforge_db::models::job::Job;
use genforge_db::repositories::RefundOutcome;
use genforge_providers::RemoteStatus;

use super::GenerationEngine;
use crate::error::StoreError;

pub(crate) const NO_ASSETS_REASON: &str = "Provider returned no assets";

/// What applying a remote status did to the job.
#[derive(Debug)]
pub(crate) enum StatusUpdate {
    /// Still running; `recorded` is false when the job moved on meanwhile.
    Progress { recorded: bool },
    /// This call moved the job to a new state.
    Advanced(Job),
    /// Another writer settled the job first.
    Unchanged,
}

impl GenerationEngine {
    /// Apply a status learned from a poll or a push.
    pub(crate) async fn apply_remote_status(
        &self,
        job: &Job,
        status: RemoteStatus,
        source: &'static str,
    ) -> Result<StatusUpdate, StoreError> {
        match status {
            RemoteStatus::InProgress { progress } => {
                let recorded = self
                    .ctx
                    .store
                    .record_poll(job.id, Utc::now(), progress)
                    .await?;
                if let Some(p) = progress.filter(|p| recorded && *p > job.progress) {
                    self.ctx.notifier.job_progress(job, p).await;
                }
                Ok(StatusUpdate::Progress { recorded })
            }
            RemoteStatus::Succeeded { assets } if assets.is_empty() => {
                tracing::warn!(job_id = %job.id, provider = %self.kind, source, "Provider reported success without assets");
                self.settle_failed(job, NO_ASSETS_REASON).await
            }
            RemoteStatus::Succeeded { assets } => {
                let transition = Transition::Succeed {
                    assets: assets.into_iter().map(AssetRef::remote).collect(),
                };
                match self
                    .ctx
                    .store
                    .apply_transition(job.id, &transition, Utc::now())
                    .await?
                {
                    Some(updated) => {
                        tracing::info!(
                            job_id = %updated.id,
                            provider = %self.kind,
                            source,
                            assets = updated.result_assets.len(),
                            "Job succeeded",
                        );
                        self.ctx.notifier.job_state_changed(&updated).await;
                        self.enqueue_retrieval(&updated);
                        Ok(StatusUpdate::Advanced(updated))
                    }
                    None => Ok(StatusUpdate::Unchanged),
                }
            }
            RemoteStatus::Failed { reason } => {
                tracing::info!(job_id = %job.id, provider = %self.kind, source, "Provider reported failure");
                self.settle_failed(job, &reason).await
            }
        }
    }

    async fn settle_failed(&self, job: &Job, reason: &str) -> Result<StatusUpdate, StoreError> {
        Ok(match self.fail_job(job, reason).await? {
            Some(updated) => StatusUpdate::Advanced(updated),
            None => StatusUpdate::Unchanged,
        })
    }

    /// Move a job to Failed and refund it if this call won the transition.
    pub(crate) async fn fail_job(&self, job: &Job, reason: &str) -> Result<Option<Job>, StoreError> {
        let Some(failed) = self
            .ctx
            .store
            .apply_transition(job.id, &Transition::fail(reason), Utc::now())
            .await?
        else {
            tracing::debug!(job_id = %job.id, "Job already settled; failure ignored");
            return Ok(None);
        };

        tracing::info!(
            job_id = %failed.id,
            provider = %self.kind,
            reason = failed.failure_reason.as_deref().unwrap_or_default(),
            "Job failed",
        );
        self.refund(&failed).await;
        self.ctx.notifier.job_state_changed(&failed).await;
        Ok(Some(failed))
    }

    /// Refund the job's debit. Ledger errors are logged, not propagated:
    /// the job is already Failed and a later refund call stays idempotent.
    async fn refund(&self, job: &Job) {
        match self.ctx.ledger.refund(job.id).await {
            Ok(RefundOutcome::Refunded {
                amount,
                balance_after,
            }) => {
                tracing::info!(job_id = %job.id, owner_id = job.owner_id, amount, balance_after, "Job refunded");
            }
            Ok(RefundOutcome::AlreadyRefunded) => {
                tracing::debug!(job_id = %job.id, "Job already refunded");
            }
            Ok(RefundOutcome::NoDebit) => {
                tracing::warn!(job_id = %job.id, "Failed job has no debit to refund");
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Refund failed");
            }
        }
    }

    pub(crate) fn raise_alert(&self, job: &Job, kind: AlertKind, attempts: u32, last_error: &str) {
        tracing::error!(
            job_id = %job.id,
            provider = %self.kind,
            alert = ?kind,
            attempts,
            last_error,
            "Retry budget exhausted",
        );
        self.ctx.notifier.alert(&OperationalAlert {
            kind,
            provider: self.kind,
            job_id: job.id,
            attempts,
            last_error: last_error.to_string(),
            raised_at: Utc::now(),
        });
    }

    fn enqueue_retrieval(&self, job: &Job) {
        if self.retrieval_tx.send(job.id).is_err() {
            tracing::debug!(job_id = %job.id, "Retriever stopped; the sweep will pick the job up");
        }
    }
}
