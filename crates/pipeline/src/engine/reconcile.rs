//! Poll submitted jobs that have not been heard from recently.

use chrono::Utc;
use futures::future::join_all;
use genforge_db::models::job::Job;

use super::transitions::StatusUpdate;
use super::{GenerationEngine, SweepReport, RECONCILE_BATCH};
use crate::error::StoreError;

impl GenerationEngine {
    /// Poll every Submitted job whose last update is older than the stale
    /// threshold. A poll error leaves the job untouched for the next sweep.
    pub async fn reconcile_once(&self) -> Result<SweepReport, StoreError> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after).unwrap_or_default();
        let cutoff = Utc::now() - stale_after;
        let jobs = self
            .ctx
            .store
            .list_stale_submitted(self.kind, cutoff, RECONCILE_BATCH)
            .await?;

        let mut report = SweepReport {
            examined: jobs.len(),
            ..SweepReport::default()
        };
        if jobs.is_empty() {
            return Ok(report);
        }

        for outcome in join_all(jobs.iter().map(|job| self.reconcile_job(job))).await {
            match outcome {
                Some(StatusUpdate::Advanced(_)) => report.advanced += 1,
                Some(_) => {}
                None => report.deferred += 1,
            }
        }
        tracing::debug!(
            provider = %self.kind,
            examined = report.examined,
            advanced = report.advanced,
            deferred = report.deferred,
            "Reconcile sweep finished",
        );
        Ok(report)
    }

    /// `None` when the job could not be checked this sweep.
    async fn reconcile_job(&self, job: &Job) -> Option<StatusUpdate> {
        let Some(remote_id) = job.remote_id.as_deref() else {
            tracing::warn!(job_id = %job.id, "Submitted job has no remote id");
            return None;
        };

        let status = match self.call(self.adapter.poll(remote_id)).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(job_id = %job.id, provider = %self.kind, remote_id, error = %e, "Poll failed");
                return None;
            }
        };

        match self.apply_remote_status(job, status, "poll").await {
            Ok(update) => Some(update),
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to apply polled status");
                None
            }
        }
    }
}
