//! Repository for the `jobs` table.
//!
//! Every state change goes through [`JobRepo::apply_transition`], a
//! single `UPDATE ... WHERE state_id = ANY(sources)` so concurrent
//! writers race on the row lock and exactly one of them wins.

use genforge_core::job::{JobState, Transition};
use genforge_core::provider::ProviderKind;
use genforge_core::types::{DbId, JobId, Timestamp};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::job::{Job, JobFilter, JobRow, NewJob};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, owner_id, provider_kind, state_id, remote_id, request_params, \
    result_assets, cost_units, failure_reason, progress, published, \
    claimed_at, retrieval_attempts, created_at, submitted_at, \
    last_polled_at, completed_at, updated_at";

/// Terminal states: failed, completed.
const TERMINAL_STATES: [i16; 2] = [JobState::Failed as i16, JobState::Completed as i16];

/// Provides lifecycle operations for generation jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new pending job.
    pub async fn create(pool: &PgPool, input: &NewJob) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (id, owner_id, provider_kind, state_id, request_params, cost_units) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(input.id)
            .bind(input.owner_id)
            .bind(input.provider_kind.id())
            .bind(JobState::Pending.id())
            .bind(&input.request_params)
            .bind(input.cost_units)
            .fetch_one(pool)
            .await?;
        into_job(row)
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(into_job)
            .transpose()
    }

    /// Find a job by the identifier its provider assigned.
    pub async fn find_by_remote_id(
        pool: &PgPool,
        kind: ProviderKind,
        remote_id: &str,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM jobs WHERE provider_kind = $1 AND remote_id = $2");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(kind.id())
            .bind(remote_id)
            .fetch_optional(pool)
            .await?
            .map(into_job)
            .transpose()
    }

    /// Atomically claim up to `limit` pending jobs for submission.
    ///
    /// A job is claimable when it has never been claimed or its claim is
    /// older than `lease_cutoff` (the claiming process died). Uses
    /// `SELECT FOR UPDATE SKIP LOCKED` so concurrent dispatchers never
    /// claim the same row.
    pub async fn claim_pending(
        pool: &PgPool,
        kind: ProviderKind,
        limit: i64,
        now: Timestamp,
        lease_cutoff: Timestamp,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET claimed_at = $1, updated_at = $1 \
             WHERE id IN ( \
                 SELECT id FROM jobs \
                 WHERE provider_kind = $2 AND state_id = $3 \
                   AND (claimed_at IS NULL OR claimed_at < $4) \
                 ORDER BY created_at ASC \
                 LIMIT $5 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(now)
            .bind(kind.id())
            .bind(JobState::Pending.id())
            .bind(lease_cutoff)
            .bind(limit)
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(into_job).collect()
    }

    /// Drop a claim so the next dispatch cycle can pick the job up again.
    pub async fn release_claim(pool: &PgPool, id: JobId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE jobs SET claimed_at = NULL WHERE id = $1 AND state_id = $2")
            .bind(id)
            .bind(JobState::Pending.id())
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Apply a lifecycle transition as a compare-and-set on `state_id`.
    ///
    /// Returns the updated job if this call won, or `None` when the job
    /// was not in one of the transition's source states (already moved
    /// by a concurrent writer, or unknown id).
    pub async fn apply_transition(
        pool: &PgPool,
        id: JobId,
        transition: &Transition,
        now: Timestamp,
    ) -> Result<Option<Job>, sqlx::Error> {
        let sources: Vec<i16> = transition.sources().iter().map(|s| s.id()).collect();
        let target = transition.target().id();

        let row = match transition {
            Transition::Submit { remote_id } => {
                let query = format!(
                    "UPDATE jobs \
                     SET state_id = $3, remote_id = $4, submitted_at = $5, \
                         last_polled_at = $5, claimed_at = NULL, updated_at = $5 \
                     WHERE id = $1 AND state_id = ANY($2) \
                     RETURNING {COLUMNS}"
                );
                sqlx::query_as::<_, JobRow>(&query)
                    .bind(id)
                    .bind(&sources)
                    .bind(target)
                    .bind(remote_id)
                    .bind(now)
                    .fetch_optional(pool)
                    .await?
            }
            Transition::Fail { reason } => {
                let query = format!(
                    "UPDATE jobs \
                     SET state_id = $3, failure_reason = $4, completed_at = $5, \
                         claimed_at = NULL, updated_at = $5 \
                     WHERE id = $1 AND state_id = ANY($2) \
                     RETURNING {COLUMNS}"
                );
                sqlx::query_as::<_, JobRow>(&query)
                    .bind(id)
                    .bind(&sources)
                    .bind(target)
                    .bind(reason)
                    .bind(now)
                    .fetch_optional(pool)
                    .await?
            }
            Transition::Succeed { assets } => {
                let query = format!(
                    "UPDATE jobs \
                     SET state_id = $3, result_assets = $4, progress = 100, \
                         last_polled_at = $5, updated_at = $5 \
                     WHERE id = $1 AND state_id = ANY($2) \
                     RETURNING {COLUMNS}"
                );
                sqlx::query_as::<_, JobRow>(&query)
                    .bind(id)
                    .bind(&sources)
                    .bind(target)
                    .bind(Json(assets))
                    .bind(now)
                    .fetch_optional(pool)
                    .await?
            }
            Transition::Complete { assets } => {
                let query = format!(
                    "UPDATE jobs \
                     SET state_id = $3, result_assets = $4, completed_at = $5, updated_at = $5 \
                     WHERE id = $1 AND state_id = ANY($2) \
                     RETURNING {COLUMNS}"
                );
                sqlx::query_as::<_, JobRow>(&query)
                    .bind(id)
                    .bind(&sources)
                    .bind(target)
                    .bind(Json(assets))
                    .bind(now)
                    .fetch_optional(pool)
                    .await?
            }
        };

        row.map(into_job).transpose()
    }

    /// Record a poll that found the job still in progress.
    ///
    /// Only touches submitted jobs. `progress` never moves backwards.
    /// Returns `true` if a row was updated.
    pub async fn record_poll(
        pool: &PgPool,
        id: JobId,
        now: Timestamp,
        progress: Option<i16>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET last_polled_at = $3, \
                 progress = GREATEST(progress, COALESCE($4, progress)), \
                 updated_at = $3 \
             WHERE id = $1 AND state_id = $2",
        )
        .bind(id)
        .bind(JobState::Submitted.id())
        .bind(now)
        .bind(progress.map(|p| p.clamp(0, 100)))
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Submitted jobs of one provider not polled since `cutoff`, oldest first.
    pub async fn list_stale_submitted(
        pool: &PgPool,
        kind: ProviderKind,
        cutoff: Timestamp,
        limit: i64,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE provider_kind = $1 AND state_id = $2 \
               AND (last_polled_at IS NULL OR last_polled_at < $3) \
             ORDER BY last_polled_at ASC NULLS FIRST \
             LIMIT $4"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(kind.id())
            .bind(JobState::Submitted.id())
            .bind(cutoff)
            .bind(limit)
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(into_job).collect()
    }

    /// Succeeded jobs still waiting for their assets, below the round cap.
    pub async fn list_awaiting_retrieval(
        pool: &PgPool,
        kind: ProviderKind,
        max_rounds: i32,
        limit: i64,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE provider_kind = $1 AND state_id = $2 AND retrieval_attempts < $3 \
             ORDER BY updated_at ASC \
             LIMIT $4"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(kind.id())
            .bind(JobState::Succeeded.id())
            .bind(max_rounds)
            .bind(limit)
            .fetch_all(pool)
            .await?;
        rows.into_iter().map(into_job).collect()
    }

    /// Count a failed retrieval round. Returns the new round count.
    pub async fn record_retrieval_failure(
        pool: &PgPool,
        id: JobId,
        now: Timestamp,
    ) -> Result<i32, sqlx::Error> {
        let attempts: Option<i32> = sqlx::query_scalar(
            "UPDATE jobs \
             SET retrieval_attempts = retrieval_attempts + 1, updated_at = $3 \
             WHERE id = $1 AND state_id = $2 \
             RETURNING retrieval_attempts",
        )
        .bind(id)
        .bind(JobState::Succeeded.id())
        .bind(now)
        .fetch_optional(pool)
        .await?;
        Ok(attempts.unwrap_or(0))
    }

    /// Toggle the `published` flag on one of the owner's completed jobs.
    ///
    /// Returns `None` if the job does not exist, belongs to another
    /// owner, or is not completed.
    pub async fn set_published(
        pool: &PgPool,
        owner_id: DbId,
        id: JobId,
        published: bool,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs SET published = $4, updated_at = NOW() \
             WHERE id = $1 AND owner_id = $2 AND state_id = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(owner_id)
            .bind(JobState::Completed.id())
            .bind(published)
            .fetch_optional(pool)
            .await?
            .map(into_job)
            .transpose()
    }

    /// List an owner's jobs, newest first, with optional filters.
    pub async fn list_by_owner(
        pool: &PgPool,
        owner_id: DbId,
        filter: &JobFilter,
    ) -> Result<Vec<Job>, sqlx::Error> {
        // Build the WHERE clause and track the next bind parameter index.
        let mut conditions: Vec<String> = vec!["owner_id = $1".to_string()];
        let mut bind_idx: u32 = 2;

        if filter.provider_kind.is_some() {
            conditions.push(format!("provider_kind = ${bind_idx}"));
            bind_idx += 1;
        }

        if !filter.states.is_empty() {
            conditions.push(format!("state_id = ANY(${bind_idx})"));
            bind_idx += 1;
        }

        match filter.finished {
            Some(true) => conditions.push(format!(
                "state_id IN ({}, {})",
                TERMINAL_STATES[0], TERMINAL_STATES[1]
            )),
            Some(false) => conditions.push(format!(
                "state_id NOT IN ({}, {})",
                TERMINAL_STATES[0], TERMINAL_STATES[1]
            )),
            None => {}
        }

        if filter.published.is_some() {
            conditions.push(format!("published = ${bind_idx}"));
            bind_idx += 1;
        }

        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE {} \
             ORDER BY created_at DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            conditions.join(" AND "),
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, JobRow>(&query).bind(owner_id);

        if let Some(kind) = filter.provider_kind {
            q = q.bind(kind.id());
        }
        if !filter.states.is_empty() {
            let states: Vec<i16> = filter.states.iter().map(|s| s.id()).collect();
            q = q.bind(states);
        }
        if let Some(published) = filter.published {
            q = q.bind(published);
        }

        q = q
            .bind(filter.effective_limit())
            .bind(filter.effective_offset());

        let rows = q.fetch_all(pool).await?;
        rows.into_iter().map(into_job).collect()
    }
}

/// Convert a stored row into a typed job, surfacing bad lookup ids as a
/// decode error.
fn into_job(row: JobRow) -> Result<Job, sqlx::Error> {
    Job::try_from(row).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}
