//! One generation engine per provider.
//!
//! The engine owns the provider's adapter and runs three timer-driven
//! loops against the shared job store:
//!
//! - the dispatcher moves pending jobs to submitted,
//! - the reconciler polls submitted jobs that have gone quiet,
//! - the retriever downloads assets of succeeded jobs.
//!
//! Pushed notifications enter through [`GenerationEngine::handle_notification`]
//! and go through the same transition code as polls. All outbound calls to
//! the provider share one semaphore sized by the provider's concurrency.
//! A second semaphore of the same size bounds jobs in dispatch, so a job
//! waiting out a submit backoff holds one slot and never the whole provider.

mod dispatch;
mod intake;
mod reconcile;
mod retrieve;
mod transitions;

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use genforge_core::provider::ProviderKind;
use genforge_core::types::JobId;
use genforge_providers::{ProviderAdapter, ProviderError};
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{default_cost_units, EngineConfig, DEFAULT_CONCURRENCY};
use crate::context::EngineContext;

pub use intake::{IgnoreReason, IntakeOutcome};
pub use retrieve::RetrievalOutcome;

/// Maximum jobs examined per reconcile sweep.
const RECONCILE_BATCH: i64 = 100;

/// Maximum jobs examined per retrieval sweep.
const RETRIEVAL_BATCH: i64 = 50;

/// Default bound on a single provider call when no provider config exists.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Tally of one dispatch, reconcile or retrieval cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Jobs looked at.
    pub examined: usize,
    /// Jobs whose state changed.
    pub advanced: usize,
    /// Jobs left for a later cycle (transport errors, released claims,
    /// store errors).
    pub deferred: usize,
}

/// Per-provider engine instance.
pub struct GenerationEngine {
    kind: ProviderKind,
    adapter: Arc<dyn ProviderAdapter>,
    ctx: EngineContext,
    config: Arc<EngineConfig>,
    concurrency: usize,
    cost_units: i64,
    call_timeout: Duration,
    provider_permits: Semaphore,
    dispatch_permits: Arc<Semaphore>,
    retrieval_permits: Semaphore,
    retrieval_tx: mpsc::UnboundedSender<JobId>,
    retrieval_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<JobId>>,
    retrieving: Mutex<HashSet<JobId>>,
    wake: Notify,
    cancel: CancellationToken,
}

impl GenerationEngine {
    /// Build the engine for `adapter`'s provider.
    ///
    /// Concurrency, price and call timeout come from the provider's entry
    /// in `config.providers`, or defaults when it has none.
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        ctx: EngineContext,
        config: Arc<EngineConfig>,
        cancel: CancellationToken,
    ) -> Self {
        let kind = adapter.kind();
        let (concurrency, cost_units, call_timeout) = match config.provider(kind) {
            Some(p) => (p.concurrency.max(1), p.cost_units, p.settings.request_timeout),
            None => (DEFAULT_CONCURRENCY, default_cost_units(kind), DEFAULT_CALL_TIMEOUT),
        };
        let (retrieval_tx, retrieval_rx) = mpsc::unbounded_channel();

        Self {
            kind,
            adapter,
            ctx,
            config,
            concurrency,
            cost_units,
            call_timeout,
            provider_permits: Semaphore::new(concurrency),
            dispatch_permits: Arc::new(Semaphore::new(concurrency)),
            retrieval_permits: Semaphore::new(concurrency),
            retrieval_tx,
            retrieval_rx: tokio::sync::Mutex::new(retrieval_rx),
            retrieving: Mutex::new(HashSet::new()),
            wake: Notify::new(),
            cancel,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
        &self.adapter
    }

    /// Units debited for each job on this provider.
    pub fn cost_units(&self) -> i64 {
        self.cost_units
    }

    /// Nudge the dispatcher to run before its next tick.
    pub fn wake_dispatcher(&self) {
        self.wake.notify_one();
    }

    /// Spawn the dispatcher, reconciler and retriever loops on `tracker`.
    pub fn spawn(self: &Arc<Self>, tracker: &TaskTracker) {
        tracker.spawn(Arc::clone(self).run_dispatcher(tracker.clone()));
        tracker.spawn(Arc::clone(self).run_reconciler());
        tracker.spawn(Arc::clone(self).run_retriever(tracker.clone()));
    }

    /// Claim pending jobs into free dispatch slots. Each claimed job runs
    /// as its own task; a finished task wakes the loop to refill its slot.
    async fn run_dispatcher(self: Arc<Self>, tracker: TaskTracker) {
        let mut ticker = tokio::time::interval(self.config.dispatch_interval);
        tracing::info!(
            provider = %self.kind,
            concurrency = self.concurrency,
            interval_ms = self.config.dispatch_interval.as_millis() as u64,
            "Dispatcher started",
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(provider = %self.kind, "Dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
            }
            if let Err(e) = self.dispatch_available(&tracker).await {
                tracing::error!(provider = %self.kind, error = %e, "Dispatch cycle failed");
            }
        }
    }

    async fn run_reconciler(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.reconcile_interval);
        tracing::info!(
            provider = %self.kind,
            interval_secs = self.config.reconcile_interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            "Reconciler started",
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(provider = %self.kind, "Reconciler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        tracing::error!(provider = %self.kind, error = %e, "Reconcile sweep failed");
                    }
                }
            }
        }
    }

    /// Retrieve jobs as they succeed, plus a periodic sweep that picks up
    /// anything missed (earlier failed rounds, jobs from before a restart).
    async fn run_retriever(self: Arc<Self>, tracker: TaskTracker) {
        let mut ticker = tokio::time::interval(self.config.retrieval_sweep_interval);
        let mut rx = self.retrieval_rx.lock().await;
        tracing::info!(provider = %self.kind, "Retriever started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(provider = %self.kind, "Retriever shutting down");
                    break;
                }
                Some(job_id) = rx.recv() => {
                    let engine = Arc::clone(&self);
                    tracker.spawn(async move {
                        if let Err(e) = engine.retrieve_job(job_id).await {
                            tracing::error!(job_id = %job_id, error = %e, "Asset retrieval failed");
                        }
                    });
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.retrieve_once().await {
                        tracing::error!(provider = %self.kind, error = %e, "Retrieval sweep failed");
                    }
                }
            }
        }
    }

    /// Run a provider call under the concurrency limit and call timeout.
    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        let _permit = self
            .provider_permits
            .acquire()
            .await
            .map_err(|_| ProviderError::Unavailable("engine stopped".into()))?;
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Unavailable(format!(
                "no response within {}s",
                self.call_timeout.as_secs()
            ))),
        }
    }

    /// Sleep for `delay` unless shutdown begins first. Returns `false` on
    /// shutdown.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
