//! Repository for `user_balances` and `ledger_entries`.
//!
//! Debits and refunds are keyed by job id. The partial unique index
//! `uq_ledger_entries_job_kind` makes a second debit or refund for the
//! same job roll back instead of touching the balance twice.

use genforge_core::types::{DbId, JobId};
use sqlx::PgPool;

use crate::models::ledger::{LedgerEntry, LedgerEntryKind};

/// Column list for `ledger_entries` queries.
const COLUMNS: &str = "id, owner_id, job_id, kind_id, amount, balance_after, note, created_at";

/// Maximum page size for entry listing.
const MAX_LIMIT: i64 = 100;

/// Result of a debit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Debited { balance_after: i64 },
    /// A debit for this job already exists; nothing changed.
    AlreadyDebited,
    InsufficientBalance { balance: i64 },
}

/// Result of a refund attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundOutcome {
    Refunded { amount: i64, balance_after: i64 },
    /// A refund for this job already exists; nothing changed.
    AlreadyRefunded,
    /// The job was never debited.
    NoDebit,
}

/// Provides balance accounting operations.
pub struct LedgerRepo;

impl LedgerRepo {
    /// Debit `amount` from `owner_id` for `job_id`.
    pub async fn debit(
        pool: &PgPool,
        owner_id: DbId,
        amount: i64,
        job_id: JobId,
    ) -> Result<DebitOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let existing: Option<DbId> = sqlx::query_scalar(
            "SELECT id FROM ledger_entries WHERE job_id = $1 AND kind_id = $2",
        )
        .bind(job_id)
        .bind(LedgerEntryKind::Debit.id())
        .fetch_optional(&mut *tx)
        .await?;
        if existing.is_some() {
            tx.rollback().await?;
            return Ok(DebitOutcome::AlreadyDebited);
        }

        sqlx::query("INSERT INTO user_balances (owner_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;

        let balance_after: Option<i64> = sqlx::query_scalar(
            "UPDATE user_balances SET balance = balance - $2, updated_at = NOW() \
             WHERE owner_id = $1 AND balance >= $2 \
             RETURNING balance",
        )
        .bind(owner_id)
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(balance_after) = balance_after else {
            let balance: i64 =
                sqlx::query_scalar("SELECT balance FROM user_balances WHERE owner_id = $1")
                    .bind(owner_id)
                    .fetch_one(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Ok(DebitOutcome::InsufficientBalance { balance });
        };

        let inserted = Self::insert_entry(
            &mut tx,
            owner_id,
            Some(job_id),
            LedgerEntryKind::Debit,
            amount,
            balance_after,
        )
        .await?;
        if !inserted {
            // Lost a race with a concurrent debit for the same job.
            tx.rollback().await?;
            return Ok(DebitOutcome::AlreadyDebited);
        }

        tx.commit().await?;
        Ok(DebitOutcome::Debited { balance_after })
    }

    /// Refund the debit recorded for `job_id`, at most once.
    pub async fn refund(pool: &PgPool, job_id: JobId) -> Result<RefundOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let debit: Option<(DbId, i64)> = sqlx::query_as(
            "SELECT owner_id, amount FROM ledger_entries WHERE job_id = $1 AND kind_id = $2",
        )
        .bind(job_id)
        .bind(LedgerEntryKind::Debit.id())
        .fetch_optional(&mut *tx)
        .await?;
        let Some((owner_id, amount)) = debit else {
            tx.rollback().await?;
            return Ok(RefundOutcome::NoDebit);
        };

        let balance_after: i64 = sqlx::query_scalar(
            "UPDATE user_balances SET balance = balance + $2, updated_at = NOW() \
             WHERE owner_id = $1 \
             RETURNING balance",
        )
        .bind(owner_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        let inserted = Self::insert_entry(
            &mut tx,
            owner_id,
            Some(job_id),
            LedgerEntryKind::Refund,
            amount,
            balance_after,
        )
        .await?;
        if !inserted {
            tx.rollback().await?;
            return Ok(RefundOutcome::AlreadyRefunded);
        }

        tx.commit().await?;
        Ok(RefundOutcome::Refunded {
            amount,
            balance_after,
        })
    }

    /// Credit `amount` to `owner_id` outside of any job (top-ups, rewards).
    pub async fn grant(
        pool: &PgPool,
        owner_id: DbId,
        amount: i64,
        note: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let balance_after: i64 = sqlx::query_scalar(
            "INSERT INTO user_balances (owner_id, balance) VALUES ($1, $2) \
             ON CONFLICT (owner_id) DO UPDATE \
             SET balance = user_balances.balance + EXCLUDED.balance, updated_at = NOW() \
             RETURNING balance",
        )
        .bind(owner_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO ledger_entries (owner_id, job_id, kind_id, amount, balance_after, note) \
             VALUES ($1, NULL, $2, $3, $4, $5)",
        )
        .bind(owner_id)
        .bind(LedgerEntryKind::Grant.id())
        .bind(amount)
        .bind(balance_after)
        .bind(note)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(balance_after)
    }

    /// Current balance; owners without a row have zero.
    pub async fn balance(pool: &PgPool, owner_id: DbId) -> Result<i64, sqlx::Error> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM user_balances WHERE owner_id = $1")
                .bind(owner_id)
                .fetch_optional(pool)
                .await?;
        Ok(balance.unwrap_or(0))
    }

    /// An owner's ledger entries, newest first.
    pub async fn list_by_owner(
        pool: &PgPool,
        owner_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntry>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM ledger_entries \
             WHERE owner_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, LedgerEntry>(&query)
            .bind(owner_id)
            .bind(limit.clamp(1, MAX_LIMIT))
            .bind(offset.max(0))
            .fetch_all(pool)
            .await
    }

    /// All entries recorded against one job.
    pub async fn list_by_job(pool: &PgPool, job_id: JobId) -> Result<Vec<LedgerEntry>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM ledger_entries WHERE job_id = $1 ORDER BY id ASC"
        );
        sqlx::query_as::<_, LedgerEntry>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }

    /// Insert a job-keyed entry. Returns `false` when the unique index
    /// already holds an entry of this kind for the job.
    async fn insert_entry(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        owner_id: DbId,
        job_id: Option<JobId>,
        kind: LedgerEntryKind,
        amount: i64,
        balance_after: i64,
    ) -> Result<bool, sqlx::Error> {
        let id: Option<DbId> = sqlx::query_scalar(
            "INSERT INTO ledger_entries (owner_id, job_id, kind_id, amount, balance_after) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (job_id, kind_id) WHERE job_id IS NOT NULL DO NOTHING \
             RETURNING id",
        )
        .bind(owner_id)
        .bind(job_id)
        .bind(kind.id())
        .bind(amount)
        .bind(balance_after)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(id.is_some())
    }
}
