//! Pending → Submitted.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use genforge_core::alert::AlertKind;
use genforge_core::backoff::with_jitter;
use genforge_core::job::Transition;
use genforge_db::models::job::Job;
use genforge_providers::ProviderError;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::task::TaskTracker;

use super::{GenerationEngine, SweepReport};
use crate::error::StoreError;

/// How a single claimed job left the dispatcher.
enum Dispatched {
    Submitted,
    Failed,
    /// Claim released on shutdown; the job stays Pending.
    Released,
    /// The job was settled by someone else before we recorded the result.
    Lost,
}

impl GenerationEngine {
    /// Claim pending jobs into the free dispatch slots and submit them,
    /// waiting for every claimed job to settle.
    pub async fn dispatch_once(&self) -> Result<SweepReport, StoreError> {
        let claimed = self.claim_batch().await?;
        let mut report = SweepReport {
            examined: claimed.len(),
            ..SweepReport::default()
        };
        if claimed.is_empty() {
            return Ok(report);
        }
        tracing::debug!(provider = %self.kind, claimed = claimed.len(), "Dispatching pending jobs");

        let results = join_all(claimed.iter().map(|(job, _permit)| self.dispatch_job(job))).await;
        for ((job, _permit), result) in claimed.iter().zip(results) {
            match self.log_dispatch(job, result) {
                Some(Dispatched::Submitted | Dispatched::Failed) => report.advanced += 1,
                _ => report.deferred += 1,
            }
        }
        Ok(report)
    }

    /// Claim pending jobs into the free dispatch slots and spawn one task
    /// per job on `tracker`. Returns the number of jobs claimed.
    pub async fn dispatch_available(self: &Arc<Self>, tracker: &TaskTracker) -> Result<usize, StoreError> {
        let claimed = self.claim_batch().await?;
        let count = claimed.len();
        if count > 0 {
            tracing::debug!(provider = %self.kind, claimed = count, "Dispatching pending jobs");
        }
        for (job, permit) in claimed {
            let engine = Arc::clone(self);
            tracker.spawn(async move {
                let result = engine.dispatch_job(&job).await;
                engine.log_dispatch(&job, result);
                drop(permit);
                engine.wake_dispatcher();
            });
        }
        Ok(count)
    }

    /// Take every free dispatch slot and claim at most that many jobs.
    /// Slots without a job are returned immediately.
    async fn claim_batch(&self) -> Result<Vec<(Job, OwnedSemaphorePermit)>, StoreError> {
        let mut permits = Vec::new();
        while let Ok(permit) = Arc::clone(&self.dispatch_permits).try_acquire_owned() {
            permits.push(permit);
        }
        if permits.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let lease_cutoff = now - chrono::Duration::from_std(self.config.claim_lease).unwrap_or_default();
        let jobs = self
            .ctx
            .store
            .claim_pending(self.kind, permits.len() as i64, now, lease_cutoff)
            .await?;
        Ok(jobs.into_iter().zip(permits).collect())
    }

    fn log_dispatch(&self, job: &Job, result: Result<Dispatched, StoreError>) -> Option<Dispatched> {
        match result {
            Ok(dispatched) => Some(dispatched),
            Err(e) => {
                tracing::error!(job_id = %job.id, provider = %self.kind, error = %e, "Failed to record dispatch result");
                None
            }
        }
    }

    async fn dispatch_job(&self, job: &Job) -> Result<Dispatched, StoreError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let error = match self.call(self.adapter.submit(&job.request_params)).await {
                Ok(remote_id) => return self.record_submission(job, remote_id).await,
                Err(e) => e,
            };

            if !error.is_retryable() {
                tracing::warn!(job_id = %job.id, provider = %self.kind, error = %error, "Provider rejected job");
                return self.dispatch_failed(job, &rejection_reason(&error)).await;
            }

            let Some(delay) = self.config.submit_backoff.delay_after(attempt) else {
                let reason = format!("Provider unavailable after {attempt} attempts");
                let outcome = self.dispatch_failed(job, &reason).await?;
                self.raise_alert(job, AlertKind::SubmitRetriesExhausted, attempt, &error.to_string());
                return Ok(outcome);
            };

            tracing::warn!(
                job_id = %job.id,
                provider = %self.kind,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %error,
                "Submission failed; retrying",
            );
            if !self.pause(with_jitter(delay)).await {
                self.ctx.store.release_claim(job.id).await?;
                tracing::info!(job_id = %job.id, "Shutdown during submission retry; claim released");
                return Ok(Dispatched::Released);
            }
        }
    }

    async fn record_submission(&self, job: &Job, remote_id: String) -> Result<Dispatched, StoreError> {
        let transition = Transition::Submit {
            remote_id: remote_id.clone(),
        };
        match self
            .ctx
            .store
            .apply_transition(job.id, &transition, Utc::now())
            .await?
        {
            Some(submitted) => {
                tracing::info!(job_id = %submitted.id, provider = %self.kind, remote_id, "Job submitted");
                self.ctx.notifier.job_state_changed(&submitted).await;
                Ok(Dispatched::Submitted)
            }
            None => {
                tracing::warn!(job_id = %job.id, remote_id, "Job left Pending during submission");
                Ok(Dispatched::Lost)
            }
        }
    }

    async fn dispatch_failed(&self, job: &Job, reason: &str) -> Result<Dispatched, StoreError> {
        Ok(match self.fail_job(job, reason).await? {
            Some(_) => Dispatched::Failed,
            None => Dispatched::Lost,
        })
    }
}

fn rejection_reason(error: &ProviderError) -> String {
    match error {
        ProviderError::InvalidParams(msg) => format!("Invalid request: {msg}"),
        ProviderError::Rejected(msg) => format!("Rejected by provider: {msg}"),
        other => other.to_string(),
    }
}
