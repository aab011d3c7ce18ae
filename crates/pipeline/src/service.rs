//! Job service facade: the entry point for callers and the owner of the
//! per-provider engines.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use genforge_core::provider::ProviderKind;
use genforge_core::types::{new_job_id, DbId, JobId};
use genforge_db::models::job::{Job, JobFilter, NewJob};
use genforge_db::models::ledger::LedgerEntry;
use genforge_db::repositories::DebitOutcome;
use genforge_providers::{ProviderAdapter, ProviderError, RawNotification};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::engine::{GenerationEngine, IntakeOutcome};
use crate::error::{EngineError, StoreError};

/// Creates jobs, answers queries and routes notifications to the engine
/// of the provider that sent them.
pub struct JobService {
    ctx: EngineContext,
    engines: HashMap<ProviderKind, Arc<GenerationEngine>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl JobService {
    /// Build one engine per adapter without starting any loops.
    ///
    /// Tests drive the engines directly through [`JobService::engine`].
    pub fn new(ctx: EngineContext, adapters: Vec<Arc<dyn ProviderAdapter>>, config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let cancel = CancellationToken::new();
        let engines = adapters
            .into_iter()
            .map(|adapter| {
                let engine = GenerationEngine::new(adapter, ctx.clone(), Arc::clone(&config), cancel.clone());
                (engine.kind(), Arc::new(engine))
            })
            .collect();

        Self {
            ctx,
            engines,
            tracker: TaskTracker::new(),
            cancel,
        }
    }

    /// Build the engines and spawn their dispatcher, reconciler and
    /// retriever loops.
    pub fn start(ctx: EngineContext, adapters: Vec<Arc<dyn ProviderAdapter>>, config: EngineConfig) -> Self {
        let service = Self::new(ctx, adapters, config);
        for engine in service.engines.values() {
            engine.spawn(&service.tracker);
        }
        tracing::info!(providers = ?service.enabled_providers(), "Job service started");
        service
    }

    pub fn engine(&self, kind: ProviderKind) -> Option<&Arc<GenerationEngine>> {
        self.engines.get(&kind)
    }

    pub fn enabled_providers(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.engines.keys().copied().collect();
        kinds.sort_by_key(|k| k.id());
        kinds
    }

    fn enabled_engine(&self, kind: ProviderKind) -> Result<&Arc<GenerationEngine>, EngineError> {
        self.engines
            .get(&kind)
            .ok_or(EngineError::ProviderNotEnabled(kind))
    }

    // ---- Jobs --------------------------------------------------------------

    /// Validate, debit and persist a new Pending job.
    ///
    /// The debit happens before the insert; an insert failure refunds it.
    pub async fn create_job(
        &self,
        owner_id: DbId,
        kind: ProviderKind,
        request_params: serde_json::Value,
    ) -> Result<Job, EngineError> {
        let engine = self.enabled_engine(kind)?;
        engine.adapter().validate(&request_params).map_err(|e| match e {
            ProviderError::InvalidParams(msg) => EngineError::InvalidParams(msg),
            other => EngineError::InvalidParams(other.to_string()),
        })?;

        let id = new_job_id();
        let cost_units = engine.cost_units();
        match self.ctx.ledger.debit(owner_id, cost_units, id).await? {
            DebitOutcome::Debited { balance_after } => {
                tracing::debug!(job_id = %id, owner_id, cost_units, balance_after, "Job debited");
            }
            DebitOutcome::InsufficientBalance { balance } => {
                return Err(EngineError::InsufficientBalance {
                    balance,
                    required: cost_units,
                });
            }
            DebitOutcome::AlreadyDebited => {
                return Err(StoreError::Conflict(format!("job {id} was already debited")).into());
            }
        }

        let input = NewJob {
            id,
            owner_id,
            provider_kind: kind,
            request_params,
            cost_units,
        };
        let job = match self.ctx.store.create(&input).await {
            Ok(job) => job,
            Err(e) => {
                if let Err(refund_err) = self.ctx.ledger.refund(id).await {
                    tracing::error!(job_id = %id, error = %refund_err, "Refund after failed insert failed");
                }
                return Err(e.into());
            }
        };

        tracing::info!(job_id = %job.id, owner_id, provider = %kind, cost_units, "Job created");
        self.ctx.notifier.job_state_changed(&job).await;
        engine.wake_dispatcher();
        Ok(job)
    }

    pub async fn get_job(&self, id: JobId) -> Result<Job, EngineError> {
        self.ctx
            .store
            .find(id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    /// An owner's jobs, newest first.
    pub async fn list_jobs(&self, owner_id: DbId, filter: &JobFilter) -> Result<Vec<Job>, EngineError> {
        Ok(self.ctx.store.list_by_owner(owner_id, filter).await?)
    }

    /// Toggle the published flag on one of the owner's completed jobs.
    pub async fn set_published(&self, owner_id: DbId, id: JobId, published: bool) -> Result<Job, EngineError> {
        if let Some(job) = self.ctx.store.set_published(owner_id, id, published).await? {
            return Ok(job);
        }
        match self.ctx.store.find(id).await? {
            Some(job) if job.owner_id == owner_id => Err(EngineError::InvalidParams(
                "only completed jobs can be published".into(),
            )),
            _ => Err(EngineError::NotFound(id)),
        }
    }

    /// Route a pushed notification to the engine of `kind`.
    pub async fn handle_notification(
        &self,
        kind: ProviderKind,
        raw: &RawNotification,
    ) -> Result<IntakeOutcome, EngineError> {
        Ok(self.enabled_engine(kind)?.handle_notification(raw).await?)
    }

    // ---- Ledger ------------------------------------------------------------

    pub async fn balance(&self, owner_id: DbId) -> Result<i64, EngineError> {
        Ok(self.ctx.ledger.balance(owner_id).await?)
    }

    /// Credit an owner outside of any job. Returns the new balance.
    pub async fn grant(&self, owner_id: DbId, amount: i64, note: Option<&str>) -> Result<i64, EngineError> {
        let balance = self.ctx.ledger.grant(owner_id, amount, note).await?;
        tracing::info!(owner_id, amount, balance, "Usage units granted");
        Ok(balance)
    }

    pub async fn ledger_entries(&self, owner_id: DbId, limit: i64, offset: i64) -> Result<Vec<LedgerEntry>, EngineError> {
        Ok(self.ctx.ledger.entries(owner_id, limit, offset).await?)
    }

    // ---- Lifecycle ---------------------------------------------------------

    /// Signal every loop to stop and wait up to `grace` for in-flight work.
    ///
    /// Returns `false` when tasks were still running at the deadline; they
    /// are abandoned and their jobs recovered by the next process.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.cancel.cancel();
        self.tracker.close();
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                tracing::info!("Job service stopped");
                true
            }
            Err(_) => {
                tracing::warn!(
                    grace_secs = grace.as_secs(),
                    remaining = self.tracker.len(),
                    "Shutdown grace period elapsed with tasks still running",
                );
                false
            }
        }
    }
}
