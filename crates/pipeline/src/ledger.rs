//! The usage ledger seam and its PostgreSQL implementation.
//!
//! Debits and refunds are idempotent per job id: repeating either call
//! reports `AlreadyDebited` / `AlreadyRefunded` and changes nothing.

use async_trait::async_trait;
use genforge_core::types::{DbId, JobId};
use genforge_db::models::ledger::LedgerEntry;
use genforge_db::repositories::{DebitOutcome, LedgerRepo, RefundOutcome};
use genforge_db::DbPool;

use crate::error::LedgerError;

/// Per-owner usage credit accounting.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Debit `amount` for `job_id`. Checked before the job exists.
    async fn debit(&self, owner_id: DbId, amount: i64, job_id: JobId) -> Result<DebitOutcome, LedgerError>;

    /// Return the debit recorded for `job_id`, at most once.
    async fn refund(&self, job_id: JobId) -> Result<RefundOutcome, LedgerError>;

    /// Credit an owner outside of any job. Returns the new balance.
    async fn grant(&self, owner_id: DbId, amount: i64, note: Option<&str>) -> Result<i64, LedgerError>;

    async fn balance(&self, owner_id: DbId) -> Result<i64, LedgerError>;

    /// An owner's entries, newest first.
    async fn entries(&self, owner_id: DbId, limit: i64, offset: i64) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Entries recorded against one job, oldest first.
    async fn job_entries(&self, job_id: JobId) -> Result<Vec<LedgerEntry>, LedgerError>;
}

/// Reject non-positive amounts before they reach storage.
pub(crate) fn ensure_positive(amount: i64) -> Result<(), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}

/// [`UsageLedger`] backed by `user_balances` and `ledger_entries`.
#[derive(Clone)]
pub struct PgLedger {
    pool: DbPool,
}

impl PgLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageLedger for PgLedger {
    async fn debit(&self, owner_id: DbId, amount: i64, job_id: JobId) -> Result<DebitOutcome, LedgerError> {
        ensure_positive(amount)?;
        Ok(LedgerRepo::debit(&self.pool, owner_id, amount, job_id).await?)
    }

    async fn refund(&self, job_id: JobId) -> Result<RefundOutcome, LedgerError> {
        Ok(LedgerRepo::refund(&self.pool, job_id).await?)
    }

    async fn grant(&self, owner_id: DbId, amount: i64, note: Option<&str>) -> Result<i64, LedgerError> {
        ensure_positive(amount)?;
        Ok(LedgerRepo::grant(&self.pool, owner_id, amount, note).await?)
    }

    async fn balance(&self, owner_id: DbId) -> Result<i64, LedgerError> {
        Ok(LedgerRepo::balance(&self.pool, owner_id).await?)
    }

    async fn entries(&self, owner_id: DbId, limit: i64, offset: i64) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(LedgerRepo::list_by_owner(&self.pool, owner_id, limit, offset).await?)
    }

    async fn job_entries(&self, job_id: JobId) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(LedgerRepo::list_by_job(&self.pool, job_id).await?)
    }
}
