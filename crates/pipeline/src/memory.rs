//! In-memory implementations of the engine seams.
//!
//! They mirror the PostgreSQL semantics closely enough to drive the
//! engine end to end in tests and local demos: the job store performs
//! the same compare-and-set on state, and the ledger enforces the same
//! one-debit, one-refund rule per job.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use genforge_core::asset::AssetRef;
use genforge_core::job::{JobState, Transition};
use genforge_core::provider::ProviderKind;
use genforge_core::types::{DbId, JobId, Timestamp};
use genforge_db::models::job::{Job, JobFilter, NewJob};
use genforge_db::models::ledger::{LedgerEntry, LedgerEntryKind};
use genforge_db::repositories::{DebitOutcome, RefundOutcome};

use crate::error::{FetchError, LedgerError, StorageError, StoreError};
use crate::fetcher::{AssetFetcher, FetchedAsset};
use crate::ledger::{ensure_positive, UsageLedger};
use crate::storage::{object_name, AssetStorage};
use crate::store::JobStore;

// ---------------------------------------------------------------------------
// Job store
// ---------------------------------------------------------------------------

/// [`JobStore`] over a mutex-guarded map.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every job, oldest first.
    pub fn all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock().values().cloned().collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        jobs
    }

    /// Shift a job's timestamps into the past, as if `by` had elapsed.
    pub fn backdate(&self, id: JobId, by: chrono::Duration) {
        if let Some(job) = self.lock().get_mut(&id) {
            job.created_at -= by;
            job.updated_at -= by;
            job.last_polled_at = job.last_polled_at.map(|t| t - by);
            job.claimed_at = job.claimed_at.map(|t| t - by);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, Job>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, input: &NewJob) -> Result<Job, StoreError> {
        let mut jobs = self.lock();
        if jobs.contains_key(&input.id) {
            return Err(StoreError::Conflict(format!("job {} already exists", input.id)));
        }
        let now = Utc::now();
        let job = Job {
            id: input.id,
            owner_id: input.owner_id,
            provider_kind: input.provider_kind,
            state: JobState::Pending,
            remote_id: None,
            request_params: input.request_params.clone(),
            result_assets: Vec::new(),
            cost_units: input.cost_units,
            failure_reason: None,
            progress: 0,
            published: false,
            claimed_at: None,
            retrieval_attempts: 0,
            created_at: now,
            submitted_at: None,
            last_polled_at: None,
            completed_at: None,
            updated_at: now,
        };
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn find_by_remote_id(
        &self,
        kind: ProviderKind,
        remote_id: &str,
    ) -> Result<Option<Job>, StoreError> {
        Ok(self
            .lock()
            .values()
            .find(|j| j.provider_kind == kind && j.remote_id.as_deref() == Some(remote_id))
            .cloned())
    }

    async fn claim_pending(
        &self,
        kind: ProviderKind,
        limit: i64,
        now: Timestamp,
        lease_cutoff: Timestamp,
    ) -> Result<Vec<Job>, StoreError> {
        let mut jobs = self.lock();
        let mut ids: Vec<(Timestamp, JobId)> = jobs
            .values()
            .filter(|j| j.provider_kind == kind && j.state == JobState::Pending)
            .filter(|j| j.claimed_at.is_none_or(|at| at < lease_cutoff))
            .map(|j| (j.created_at, j.id))
            .collect();
        ids.sort();
        ids.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(ids.len());
        for (_, id) in ids {
            if let Some(job) = jobs.get_mut(&id) {
                job.claimed_at = Some(now);
                job.updated_at = now;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn release_claim(&self, id: JobId) -> Result<(), StoreError> {
        if let Some(job) = self.lock().get_mut(&id) {
            if job.state == JobState::Pending {
                job.claimed_at = None;
            }
        }
        Ok(())
    }

    async fn apply_transition(
        &self,
        id: JobId,
        transition: &Transition,
        now: Timestamp,
    ) -> Result<Option<Job>, StoreError> {
        transition.validate()?;
        let mut jobs = self.lock();

        let Some(kind) = jobs.get(&id).map(|j| j.provider_kind) else {
            return Ok(None);
        };
        if let Transition::Submit { remote_id } = transition {
            let taken = jobs.values().any(|j| {
                j.id != id && j.provider_kind == kind && j.remote_id.as_deref() == Some(remote_id.as_str())
            });
            if taken {
                return Err(StoreError::Conflict(format!("remote id {remote_id} already recorded")));
            }
        }

        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        if !transition.sources().contains(&job.state) {
            return Ok(None);
        }

        job.state = transition.target();
        job.updated_at = now;
        match transition {
            Transition::Submit { remote_id } => {
                job.remote_id = Some(remote_id.clone());
                job.submitted_at = Some(now);
                job.last_polled_at = Some(now);
                job.claimed_at = None;
            }
            Transition::Fail { reason } => {
                job.failure_reason = Some(reason.clone());
                job.completed_at = Some(now);
                job.claimed_at = None;
            }
            Transition::Succeed { assets } => {
                job.result_assets = assets.clone();
                job.progress = 100;
                job.last_polled_at = Some(now);
            }
            Transition::Complete { assets } => {
                job.result_assets = assets.clone();
                job.completed_at = Some(now);
            }
        }
        Ok(Some(job.clone()))
    }

    async fn record_poll(
        &self,
        id: JobId,
        now: Timestamp,
        progress: Option<i16>,
    ) -> Result<bool, StoreError> {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(job) if job.state == JobState::Submitted => {
                job.last_polled_at = Some(now);
                job.updated_at = now;
                if let Some(p) = progress {
                    job.progress = job.progress.max(p.clamp(0, 100));
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_stale_submitted(
        &self,
        kind: ProviderKind,
        cutoff: Timestamp,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let mut stale: Vec<Job> = self
            .lock()
            .values()
            .filter(|j| j.provider_kind == kind && j.state == JobState::Submitted)
            .filter(|j| j.last_polled_at.is_none_or(|at| at < cutoff))
            .cloned()
            .collect();
        // `None` sorts first, matching NULLS FIRST.
        stale.sort_by_key(|j| j.last_polled_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn list_awaiting_retrieval(
        &self,
        kind: ProviderKind,
        max_rounds: i32,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let mut waiting: Vec<Job> = self
            .lock()
            .values()
            .filter(|j| j.provider_kind == kind && j.state == JobState::Succeeded)
            .filter(|j| j.retrieval_attempts < max_rounds)
            .cloned()
            .collect();
        waiting.sort_by_key(|j| j.updated_at);
        waiting.truncate(limit.max(0) as usize);
        Ok(waiting)
    }

    async fn record_retrieval_failure(&self, id: JobId, now: Timestamp) -> Result<i32, StoreError> {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(job) if job.state == JobState::Succeeded => {
                job.retrieval_attempts += 1;
                job.updated_at = now;
                Ok(job.retrieval_attempts)
            }
            _ => Ok(0),
        }
    }

    async fn set_published(
        &self,
        owner_id: DbId,
        id: JobId,
        published: bool,
    ) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(job) if job.owner_id == owner_id && job.state == JobState::Completed => {
                job.published = published;
                job.updated_at = Utc::now();
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_by_owner(&self, owner_id: DbId, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self
            .lock()
            .values()
            .filter(|j| j.owner_id == owner_id && filter.matches(j))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| std::cmp::Reverse((j.created_at, j.id)));
        Ok(jobs
            .into_iter()
            .skip(filter.effective_offset() as usize)
            .take(filter.effective_limit() as usize)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LedgerBook {
    balances: HashMap<DbId, i64>,
    entries: Vec<LedgerEntry>,
}

impl LedgerBook {
    fn has_entry(&self, job_id: JobId, kind: LedgerEntryKind) -> bool {
        self.entries
            .iter()
            .any(|e| e.job_id == Some(job_id) && e.kind_id == kind.id())
    }

    fn push(
        &mut self,
        owner_id: DbId,
        job_id: Option<JobId>,
        kind: LedgerEntryKind,
        amount: i64,
        balance_after: i64,
        note: Option<&str>,
    ) {
        let id = self.entries.len() as DbId + 1;
        self.entries.push(LedgerEntry {
            id,
            owner_id,
            job_id,
            kind_id: kind.id(),
            amount,
            balance_after,
            note: note.map(str::to_string),
            created_at: Utc::now(),
        });
    }
}

/// [`UsageLedger`] over a mutex-guarded book.
#[derive(Default)]
pub struct MemoryLedger {
    book: Mutex<LedgerBook>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerBook> {
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl UsageLedger for MemoryLedger {
    async fn debit(&self, owner_id: DbId, amount: i64, job_id: JobId) -> Result<DebitOutcome, LedgerError> {
        ensure_positive(amount)?;
        let mut book = self.lock();
        if book.has_entry(job_id, LedgerEntryKind::Debit) {
            return Ok(DebitOutcome::AlreadyDebited);
        }
        let balance = book.balances.get(&owner_id).copied().unwrap_or(0);
        if balance < amount {
            return Ok(DebitOutcome::InsufficientBalance { balance });
        }
        let balance_after = balance - amount;
        book.balances.insert(owner_id, balance_after);
        book.push(owner_id, Some(job_id), LedgerEntryKind::Debit, amount, balance_after, None);
        Ok(DebitOutcome::Debited { balance_after })
    }

    async fn refund(&self, job_id: JobId) -> Result<RefundOutcome, LedgerError> {
        let mut book = self.lock();
        let Some((owner_id, amount)) = book
            .entries
            .iter()
            .find(|e| e.job_id == Some(job_id) && e.kind_id == LedgerEntryKind::Debit.id())
            .map(|e| (e.owner_id, e.amount))
        else {
            return Ok(RefundOutcome::NoDebit);
        };
        if book.has_entry(job_id, LedgerEntryKind::Refund) {
            return Ok(RefundOutcome::AlreadyRefunded);
        }
        let balance_after = book.balances.get(&owner_id).copied().unwrap_or(0) + amount;
        book.balances.insert(owner_id, balance_after);
        book.push(owner_id, Some(job_id), LedgerEntryKind::Refund, amount, balance_after, None);
        Ok(RefundOutcome::Refunded { amount, balance_after })
    }

    async fn grant(&self, owner_id: DbId, amount: i64, note: Option<&str>) -> Result<i64, LedgerError> {
        ensure_positive(amount)?;
        let mut book = self.lock();
        let balance_after = book.balances.get(&owner_id).copied().unwrap_or(0) + amount;
        book.balances.insert(owner_id, balance_after);
        book.push(owner_id, None, LedgerEntryKind::Grant, amount, balance_after, note);
        Ok(balance_after)
    }

    async fn balance(&self, owner_id: DbId) -> Result<i64, LedgerError> {
        Ok(self.lock().balances.get(&owner_id).copied().unwrap_or(0))
    }

    async fn entries(&self, owner_id: DbId, limit: i64, offset: i64) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self
            .lock()
            .entries
            .iter()
            .rev()
            .filter(|e| e.owner_id == owner_id)
            .skip(offset.max(0) as usize)
            .take(limit.clamp(1, 100) as usize)
            .cloned()
            .collect())
    }

    async fn job_entries(&self, job_id: JobId) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self
            .lock()
            .entries
            .iter()
            .filter(|e| e.job_id == Some(job_id))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Asset storage
// ---------------------------------------------------------------------------

/// [`AssetStorage`] that keeps bytes in memory under `mem://` references.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reference: &str) -> Option<Vec<u8>> {
        self.lock().get(reference).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AssetStorage for MemoryStorage {
    async fn store(&self, bytes: &[u8], content_type: &str, source_url: &str) -> Result<AssetRef, StorageError> {
        if bytes.is_empty() {
            return Err(StorageError::Empty);
        }
        let reference = format!("mem://{}", object_name(bytes, content_type, source_url));
        self.lock().insert(reference.clone(), bytes.to_vec());
        Ok(AssetRef::local(reference, content_type, bytes.len() as u64))
    }
}

// ---------------------------------------------------------------------------
// Asset fetcher
// ---------------------------------------------------------------------------

struct Route {
    asset: FetchedAsset,
    failures_left: u32,
    calls: u32,
}

/// Scripted [`AssetFetcher`]: serves registered URLs, optionally failing
/// the first few requests. Unknown URLs answer 404.
#[derive(Default)]
pub struct MemoryFetcher {
    routes: Mutex<HashMap<String, Route>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bytes` at `url`.
    pub fn serve(&self, url: &str, bytes: impl Into<Vec<u8>>, content_type: &str) {
        self.serve_after_failures(url, bytes, content_type, 0);
    }

    /// Serve `bytes` at `url` after `failures` transport errors.
    pub fn serve_after_failures(&self, url: &str, bytes: impl Into<Vec<u8>>, content_type: &str, failures: u32) {
        self.lock().insert(
            url.to_string(),
            Route {
                asset: FetchedAsset {
                    bytes: bytes.into(),
                    content_type: content_type.to_string(),
                },
                failures_left: failures,
                calls: 0,
            },
        );
    }

    /// Number of fetches made for `url`.
    pub fn calls(&self, url: &str) -> u32 {
        self.lock().get(url).map_or(0, |r| r.calls)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Route>> {
        self.routes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AssetFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, FetchError> {
        let mut routes = self.lock();
        let Some(route) = routes.get_mut(url) else {
            return Err(FetchError::Status(404));
        };
        route.calls += 1;
        if route.failures_left > 0 {
            route.failures_left -= 1;
            return Err(FetchError::Transport("connection reset".into()));
        }
        Ok(route.asset.clone())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use genforge_core::types::new_job_id;

    use super::*;

    fn new_job(owner_id: DbId, kind: ProviderKind) -> NewJob {
        NewJob {
            id: new_job_id(),
            owner_id,
            provider_kind: kind,
            request_params: serde_json::json!({"prompt": "p"}),
            cost_units: 10,
        }
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = MemoryJobStore::new();
        let job = store.create(&new_job(1, ProviderKind::ImageA)).await.unwrap();
        let now = Utc::now();

        let submit = Transition::Submit { remote_id: "r1".into() };
        assert!(store.apply_transition(job.id, &submit, now).await.unwrap().is_some());
        assert!(store.apply_transition(job.id, &submit, now).await.unwrap().is_none());

        let fail = Transition::fail("boom");
        let failed = store.apply_transition(job.id, &fail, now).await.unwrap().unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert!(store.apply_transition(job.id, &fail, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_remote_id_is_a_conflict_within_a_provider() {
        let store = MemoryJobStore::new();
        let a = store.create(&new_job(1, ProviderKind::Music)).await.unwrap();
        let b = store.create(&new_job(1, ProviderKind::Music)).await.unwrap();
        let c = store.create(&new_job(1, ProviderKind::Video)).await.unwrap();
        let submit = Transition::Submit { remote_id: "same".into() };
        let now = Utc::now();

        store.apply_transition(a.id, &submit, now).await.unwrap();
        assert_matches!(
            store.apply_transition(b.id, &submit, now).await,
            Err(StoreError::Conflict(_))
        );
        assert!(store.apply_transition(c.id, &submit, now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn claims_respect_the_lease() {
        let store = MemoryJobStore::new();
        let job = store.create(&new_job(1, ProviderKind::ImageB)).await.unwrap();
        let now = Utc::now();
        let lease = chrono::Duration::minutes(10);

        let first = store.claim_pending(ProviderKind::ImageB, 10, now, now - lease).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = store.claim_pending(ProviderKind::ImageB, 10, now, now - lease).await.unwrap();
        assert!(second.is_empty());

        let later = now + chrono::Duration::minutes(11);
        let reclaimed = store.claim_pending(ProviderKind::ImageB, 10, later, later - lease).await.unwrap();
        assert_eq!(reclaimed[0].id, job.id);
    }

    #[tokio::test]
    async fn ledger_debits_and_refunds_once() {
        let ledger = MemoryLedger::new();
        let job_id = new_job_id();
        ledger.grant(5, 50, Some("top-up")).await.unwrap();

        assert_eq!(
            ledger.debit(5, 10, job_id).await.unwrap(),
            DebitOutcome::Debited { balance_after: 40 }
        );
        assert_eq!(ledger.debit(5, 10, job_id).await.unwrap(), DebitOutcome::AlreadyDebited);
        assert_eq!(
            ledger.refund(job_id).await.unwrap(),
            RefundOutcome::Refunded { amount: 10, balance_after: 50 }
        );
        assert_eq!(ledger.refund(job_id).await.unwrap(), RefundOutcome::AlreadyRefunded);
        assert_eq!(ledger.refund(new_job_id()).await.unwrap(), RefundOutcome::NoDebit);
        assert_eq!(ledger.job_entries(job_id).await.unwrap().len(), 2);

        let entries = ledger.entries(5, 10, 0).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].kind(), Some(LedgerEntryKind::Refund));
        assert_eq!(entries[2].note.as_deref(), Some("top-up"));
    }

    #[tokio::test]
    async fn ledger_rejects_overdraft_and_bad_amounts() {
        let ledger = MemoryLedger::new();
        assert_eq!(
            ledger.debit(9, 10, new_job_id()).await.unwrap(),
            DebitOutcome::InsufficientBalance { balance: 0 }
        );
        assert_matches!(ledger.grant(9, 0, None).await, Err(LedgerError::InvalidAmount(0)));
        assert_matches!(ledger.debit(9, -1, new_job_id()).await, Err(LedgerError::InvalidAmount(-1)));
    }

    #[tokio::test]
    async fn fetcher_fails_then_serves() {
        let fetcher = MemoryFetcher::new();
        fetcher.serve_after_failures("https://cdn/a.png", b"img".to_vec(), "image/png", 2);

        assert_matches!(fetcher.fetch("https://cdn/a.png").await, Err(FetchError::Transport(_)));
        assert_matches!(fetcher.fetch("https://cdn/a.png").await, Err(FetchError::Transport(_)));
        let asset = fetcher.fetch("https://cdn/a.png").await.unwrap();
        assert_eq!(asset.bytes, b"img");
        assert_eq!(fetcher.calls("https://cdn/a.png"), 3);
        assert_matches!(fetcher.fetch("https://cdn/missing").await, Err(FetchError::Status(404)));
    }
}
