//! The job store seam and its PostgreSQL implementation.
//!
//! Every state change goes through [`JobStore::apply_transition`], a
//! compare-and-set keyed by job id: when two writers race, exactly one
//! gets `Some(job)` back and the other gets `None`.

use async_trait::async_trait;
use genforge_core::job::Transition;
use genforge_core::provider::ProviderKind;
use genforge_core::types::{DbId, JobId, Timestamp};
use genforge_db::models::job::{Job, JobFilter, NewJob};
use genforge_db::repositories::JobRepo;
use genforge_db::DbPool;

use crate::error::StoreError;

/// Durable record of every job.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, input: &NewJob) -> Result<Job, StoreError>;

    async fn find(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    async fn find_by_remote_id(
        &self,
        kind: ProviderKind,
        remote_id: &str,
    ) -> Result<Option<Job>, StoreError>;

    /// Claim up to `limit` pending jobs whose claim is absent or older
    /// than `lease_cutoff`, oldest first.
    async fn claim_pending(
        &self,
        kind: ProviderKind,
        limit: i64,
        now: Timestamp,
        lease_cutoff: Timestamp,
    ) -> Result<Vec<Job>, StoreError>;

    async fn release_claim(&self, id: JobId) -> Result<(), StoreError>;

    /// Compare-and-set the job into the transition's target state.
    async fn apply_transition(
        &self,
        id: JobId,
        transition: &Transition,
        now: Timestamp,
    ) -> Result<Option<Job>, StoreError>;

    /// Stamp `last_polled_at` on a submitted job and raise its progress.
    async fn record_poll(
        &self,
        id: JobId,
        now: Timestamp,
        progress: Option<i16>,
    ) -> Result<bool, StoreError>;

    async fn list_stale_submitted(
        &self,
        kind: ProviderKind,
        cutoff: Timestamp,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError>;

    async fn list_awaiting_retrieval(
        &self,
        kind: ProviderKind,
        max_rounds: i32,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError>;

    /// Count a failed retrieval round; returns the new round count.
    async fn record_retrieval_failure(&self, id: JobId, now: Timestamp) -> Result<i32, StoreError>;

    /// Toggle the published flag of an owner's completed job.
    async fn set_published(
        &self,
        owner_id: DbId,
        id: JobId,
        published: bool,
    ) -> Result<Option<Job>, StoreError>;

    async fn list_by_owner(&self, owner_id: DbId, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;
}

/// [`JobStore`] backed by the `jobs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, input: &NewJob) -> Result<Job, StoreError> {
        Ok(JobRepo::create(&self.pool, input).await?)
    }

    async fn find(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(JobRepo::find_by_id(&self.pool, id).await?)
    }

    async fn find_by_remote_id(
        &self,
        kind: ProviderKind,
        remote_id: &str,
    ) -> Result<Option<Job>, StoreError> {
        Ok(JobRepo::find_by_remote_id(&self.pool, kind, remote_id).await?)
    }

    async fn claim_pending(
        &self,
        kind: ProviderKind,
        limit: i64,
        now: Timestamp,
        lease_cutoff: Timestamp,
    ) -> Result<Vec<Job>, StoreError> {
        Ok(JobRepo::claim_pending(&self.pool, kind, limit, now, lease_cutoff).await?)
    }

    async fn release_claim(&self, id: JobId) -> Result<(), StoreError> {
        Ok(JobRepo::release_claim(&self.pool, id).await?)
    }

    async fn apply_transition(
        &self,
        id: JobId,
        transition: &Transition,
        now: Timestamp,
    ) -> Result<Option<Job>, StoreError> {
        transition.validate()?;
        Ok(JobRepo::apply_transition(&self.pool, id, transition, now).await?)
    }

    async fn record_poll(
        &self,
        id: JobId,
        now: Timestamp,
        progress: Option<i16>,
    ) -> Result<bool, StoreError> {
        Ok(JobRepo::record_poll(&self.pool, id, now, progress).await?)
    }

    async fn list_stale_submitted(
        &self,
        kind: ProviderKind,
        cutoff: Timestamp,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        Ok(JobRepo::list_stale_submitted(&self.pool, kind, cutoff, limit).await?)
    }

    async fn list_awaiting_retrieval(
        &self,
        kind: ProviderKind,
        max_rounds: i32,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        Ok(JobRepo::list_awaiting_retrieval(&self.pool, kind, max_rounds, limit).await?)
    }

    async fn record_retrieval_failure(&self, id: JobId, now: Timestamp) -> Result<i32, StoreError> {
        Ok(JobRepo::record_retrieval_failure(&self.pool, id, now).await?)
    }

    async fn set_published(
        &self,
        owner_id: DbId,
        id: JobId,
        published: bool,
    ) -> Result<Option<Job>, StoreError> {
        Ok(JobRepo::set_published(&self.pool, owner_id, id, published).await?)
    }

    async fn list_by_owner(&self, owner_id: DbId, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        Ok(JobRepo::list_by_owner(&self.pool, owner_id, filter).await?)
    }
}
