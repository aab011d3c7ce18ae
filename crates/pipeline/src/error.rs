//! Error types for the engine seams and the job service facade.

use genforge_core::error::CoreError;
use genforge_core::provider::ProviderKind;
use genforge_core::types::JobId;

/// Errors from a [`JobStore`](crate::store::JobStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The transition payload violates a job invariant.
    #[error("Invalid transition: {0}")]
    InvalidTransition(#[from] CoreError),

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Errors from a [`UsageLedger`](crate::ledger::UsageLedger).
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors from an [`AssetStorage`](crate::storage::AssetStorage).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Refusing to store an empty asset")]
    Empty,
}

/// Errors from an [`AssetFetcher`](crate::fetcher::AssetFetcher).
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection, TLS, timeout or body read failure.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("Asset exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

impl FetchError {
    /// Whether downloading the same URL again may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::TooLarge { .. })
    }
}

/// Errors returned to callers of the [`JobService`](crate::service::JobService).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Insufficient balance: {balance} available, {required} required")]
    InsufficientBalance { balance: i64, required: i64 },

    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Provider {0} is not enabled")]
    ProviderNotEnabled(ProviderKind),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
