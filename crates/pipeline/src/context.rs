//! Shared collaborators handed to every engine.

use std::sync::Arc;

use genforge_db::DbPool;
use genforge_events::JobNotifier;

use crate::fetcher::AssetFetcher;
use crate::ledger::{PgLedger, UsageLedger};
use crate::storage::AssetStorage;
use crate::store::{JobStore, PgJobStore};

/// Everything an engine mutates or talks to besides its adapter.
///
/// Built once at startup and cloned into each provider engine; there is
/// no global lookup.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn JobStore>,
    pub ledger: Arc<dyn UsageLedger>,
    pub storage: Arc<dyn AssetStorage>,
    pub fetcher: Arc<dyn AssetFetcher>,
    pub notifier: JobNotifier,
}

impl EngineContext {
    pub fn new(
        store: Arc<dyn JobStore>,
        ledger: Arc<dyn UsageLedger>,
        storage: Arc<dyn AssetStorage>,
        fetcher: Arc<dyn AssetFetcher>,
        notifier: JobNotifier,
    ) -> Self {
        Self {
            store,
            ledger,
            storage,
            fetcher,
            notifier,
        }
    }

    /// Context backed by PostgreSQL for jobs and the ledger.
    pub fn postgres(
        pool: DbPool,
        storage: Arc<dyn AssetStorage>,
        fetcher: Arc<dyn AssetFetcher>,
        notifier: JobNotifier,
    ) -> Self {
        Self::new(
            Arc::new(PgJobStore::new(pool.clone())),
            Arc::new(PgLedger::new(pool)),
            storage,
            fetcher,
            notifier,
        )
    }
}
