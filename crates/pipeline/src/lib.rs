//! Generation job engine.
//!
//! [`JobService`] owns one [`GenerationEngine`] per enabled provider. Each
//! engine moves jobs through Pending → Submitted → Succeeded → Completed
//! (or Failed) using the seams defined here:
//!
//! - [`JobStore`]: durable jobs with compare-and-set transitions,
//! - [`UsageLedger`]: idempotent per-job debits and refunds,
//! - [`AssetStorage`] and [`AssetFetcher`]: copying results locally.
//!
//! PostgreSQL and filesystem implementations back the worker binary; the
//! [`memory`] module provides in-process ones for tests.

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod ledger;
pub mod memory;
pub mod service;
pub mod storage;
pub mod store;

pub use config::{ConfigError, EngineConfig, ProviderConfig};
pub use context::EngineContext;
pub use engine::{GenerationEngine, IgnoreReason, IntakeOutcome, RetrievalOutcome, SweepReport};
pub use error::{EngineError, FetchError, LedgerError, StorageError, StoreError};
pub use fetcher::{AssetFetcher, FetchedAsset, HttpFetcher};
pub use ledger::{PgLedger, UsageLedger};
pub use service::JobService;
pub use storage::{AssetStorage, LocalFsStorage};
pub use store::{JobStore, PgJobStore};
