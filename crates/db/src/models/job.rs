//! Job entity models and DTOs for the generation engine.

use genforge_core::asset::AssetRef;
use genforge_core::job::JobState;
use genforge_core::provider::ProviderKind;
use genforge_core::types::{DbId, JobId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Default page size for job listing.
pub const DEFAULT_LIMIT: i64 = 20;

/// Maximum page size for job listing.
pub const MAX_LIMIT: i64 = 100;

/// A row from the `jobs` table, as stored.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: JobId,
    pub owner_id: DbId,
    pub provider_kind: i16,
    pub state_id: i16,
    pub remote_id: Option<String>,
    pub request_params: serde_json::Value,
    pub result_assets: Json<Vec<AssetRef>>,
    pub cost_units: i64,
    pub failure_reason: Option<String>,
    pub progress: i16,
    pub published: bool,
    pub claimed_at: Option<Timestamp>,
    pub retrieval_attempts: i32,
    pub created_at: Timestamp,
    pub submitted_at: Option<Timestamp>,
    pub last_polled_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

/// A job snapshot with typed state and provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub owner_id: DbId,
    pub provider_kind: ProviderKind,
    pub state: JobState,
    pub remote_id: Option<String>,
    pub request_params: serde_json::Value,
    pub result_assets: Vec<AssetRef>,
    pub cost_units: i64,
    pub failure_reason: Option<String>,
    pub progress: i16,
    pub published: bool,
    #[serde(skip)]
    pub claimed_at: Option<Timestamp>,
    #[serde(skip)]
    pub retrieval_attempts: i32,
    pub created_at: Timestamp,
    pub submitted_at: Option<Timestamp>,
    pub last_polled_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl TryFrom<JobRow> for Job {
    type Error = genforge_core::error::CoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            provider_kind: ProviderKind::from_id(row.provider_kind)?,
            state: JobState::from_id(row.state_id)?,
            remote_id: row.remote_id,
            request_params: row.request_params,
            result_assets: row.result_assets.0,
            cost_units: row.cost_units,
            failure_reason: row.failure_reason,
            progress: row.progress,
            published: row.published,
            claimed_at: row.claimed_at,
            retrieval_attempts: row.retrieval_attempts,
            created_at: row.created_at,
            submitted_at: row.submitted_at,
            last_polled_at: row.last_polled_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}

/// Input for creating a pending job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub owner_id: DbId,
    pub provider_kind: ProviderKind,
    pub request_params: serde_json::Value,
    pub cost_units: i64,
}

/// Filters for listing an owner's jobs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub provider_kind: Option<ProviderKind>,
    /// Restrict to these states; empty means any.
    #[serde(default)]
    pub states: Vec<JobState>,
    /// `true` for terminal jobs only, `false` for non-terminal only.
    pub finished: Option<bool>,
    pub published: Option<bool>,
    /// Maximum number of results. Defaults to 20, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

impl JobFilter {
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    /// In-memory evaluation of the same predicate the SQL query applies.
    pub fn matches(&self, job: &Job) -> bool {
        if self.provider_kind.is_some_and(|k| k != job.provider_kind) {
            return false;
        }
        if !self.states.is_empty() && !self.states.contains(&job.state) {
            return false;
        }
        if self.finished.is_some_and(|f| f != job.state.is_terminal()) {
            return false;
        }
        if self.published.is_some_and(|p| p != job.published) {
            return false;
        }
        true
    }
}
