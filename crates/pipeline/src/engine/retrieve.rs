//! Succeeded → Completed: copy remote assets into durable storage.
//!
//! A failed retrieval never fails the job. The job stays Succeeded with
//! its remote references and is retried on later sweeps until the round
//! budget runs out, at which point an operational alert is raised.

use chrono::Utc;
use futures::future::join_all;
use genforge_core::alert::AlertKind;
use genforge_core::asset::AssetRef;
use genforge_core::backoff::with_jitter;
use genforge_core::job::{JobState, Transition};
use genforge_core::types::JobId;
use genforge_db::models::job::Job;

use super::{GenerationEngine, SweepReport, RETRIEVAL_BATCH};
use crate::error::StoreError;

/// Result of one retrieval attempt for a job.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalOutcome {
    /// All assets stored; the job is Completed.
    Completed(Job),
    /// The job is not (or no longer) Succeeded.
    NotNeeded,
    /// Another task is already retrieving this job.
    InFlight,
    /// This round failed; the sweep will try again.
    Deferred { rounds: i32 },
    /// The round budget is spent; the job stays Succeeded.
    Abandoned { rounds: i32 },
    /// Shutdown began mid-download; no round was counted.
    Interrupted,
}

enum DownloadError {
    Failed(String),
    Cancelled,
}

/// Removes the job from the in-flight set when retrieval ends.
struct InFlight<'a> {
    engine: &'a GenerationEngine,
    job_id: JobId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.engine.in_flight().remove(&self.job_id);
    }
}

impl GenerationEngine {
    fn in_flight(&self) -> std::sync::MutexGuard<'_, std::collections::HashSet<JobId>> {
        self.retrieving.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Retrieve every Succeeded job still within its round budget.
    pub async fn retrieve_once(&self) -> Result<SweepReport, StoreError> {
        let jobs = self
            .ctx
            .store
            .list_awaiting_retrieval(self.kind, self.config.max_retrieval_rounds, RETRIEVAL_BATCH)
            .await?;

        let mut report = SweepReport {
            examined: jobs.len(),
            ..SweepReport::default()
        };
        for outcome in join_all(jobs.iter().map(|job| self.retrieve_job(job.id))).await {
            match outcome {
                Ok(RetrievalOutcome::Completed(_)) => report.advanced += 1,
                Ok(RetrievalOutcome::NotNeeded | RetrievalOutcome::InFlight) => {}
                Ok(_) => report.deferred += 1,
                Err(e) => {
                    tracing::error!(provider = %self.kind, error = %e, "Retrieval failed to update store");
                    report.deferred += 1;
                }
            }
        }
        Ok(report)
    }

    /// Download and store all assets of a Succeeded job, then complete it.
    pub async fn retrieve_job(&self, job_id: JobId) -> Result<RetrievalOutcome, StoreError> {
        let claimed = self.in_flight().insert(job_id);
        if !claimed {
            return Ok(RetrievalOutcome::InFlight);
        }
        let _guard = InFlight {
            engine: self,
            job_id,
        };

        let Some(job) = self.ctx.store.find(job_id).await? else {
            return Ok(RetrievalOutcome::NotNeeded);
        };
        if job.state != JobState::Succeeded {
            return Ok(RetrievalOutcome::NotNeeded);
        }

        let Ok(_permit) = self.retrieval_permits.acquire().await else {
            return Ok(RetrievalOutcome::Interrupted);
        };

        let mut stored = Vec::with_capacity(job.result_assets.len());
        for asset in &job.result_assets {
            let local = match asset {
                AssetRef::Local { .. } => asset.clone(),
                AssetRef::Remote { url } => match self.download(&job, url).await {
                    Ok(local) => local,
                    Err(DownloadError::Cancelled) => return Ok(RetrievalOutcome::Interrupted),
                    Err(DownloadError::Failed(last_error)) => {
                        return self.retrieval_failed(&job, &last_error).await;
                    }
                },
            };
            stored.push(local);
        }

        let transition = Transition::Complete { assets: stored };
        match self
            .ctx
            .store
            .apply_transition(job.id, &transition, Utc::now())
            .await?
        {
            Some(completed) => {
                tracing::info!(
                    job_id = %completed.id,
                    provider = %self.kind,
                    assets = completed.result_assets.len(),
                    "Job completed",
                );
                self.ctx.notifier.job_state_changed(&completed).await;
                Ok(RetrievalOutcome::Completed(completed))
            }
            None => Ok(RetrievalOutcome::NotNeeded),
        }
    }

    /// Fetch one asset with backoff and write it to storage.
    async fn download(&self, job: &Job, url: &str) -> Result<AssetRef, DownloadError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let error = match self.ctx.fetcher.fetch(url).await {
                Ok(fetched) => {
                    return self
                        .ctx
                        .storage
                        .store(&fetched.bytes, &fetched.content_type, url)
                        .await
                        .map_err(|e| DownloadError::Failed(e.to_string()));
                }
                Err(e) => e,
            };

            let delay = match self.config.download_backoff.delay_after(attempt) {
                Some(delay) if error.is_retryable() => delay,
                _ => return Err(DownloadError::Failed(error.to_string())),
            };
            tracing::warn!(
                job_id = %job.id,
                url,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %error,
                "Asset download failed; retrying",
            );
            if !self.pause(with_jitter(delay)).await {
                return Err(DownloadError::Cancelled);
            }
        }
    }

    async fn retrieval_failed(&self, job: &Job, last_error: &str) -> Result<RetrievalOutcome, StoreError> {
        let rounds = self
            .ctx
            .store
            .record_retrieval_failure(job.id, Utc::now())
            .await?;

        if rounds >= self.config.max_retrieval_rounds {
            self.raise_alert(job, AlertKind::RetrievalRetriesExhausted, rounds.max(0) as u32, last_error);
            return Ok(RetrievalOutcome::Abandoned { rounds });
        }

        tracing::warn!(
            job_id = %job.id,
            provider = %self.kind,
            rounds,
            max_rounds = self.config.max_retrieval_rounds,
            error = last_error,
            "Asset retrieval round failed",
        );
        Ok(RetrievalOutcome::Deferred { rounds })
    }
}
