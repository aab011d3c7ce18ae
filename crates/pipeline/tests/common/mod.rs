//! Shared fixtures for engine integration tests: a scripted provider
//! adapter and a service wired to the in-memory seams.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use genforge_core::backoff::BackoffConfig;
use genforge_core::provider::ProviderKind;
use genforge_core::types::{DbId, JobId};
use genforge_db::models::job::Job;
use genforge_events::{ConnectionRegistry, EventBus, JobNotifier, PlatformEvent};
use genforge_pipeline::memory::{MemoryFetcher, MemoryJobStore, MemoryLedger, MemoryStorage};
use genforge_pipeline::{EngineConfig, EngineContext, GenerationEngine, JobService, ProviderConfig};
use genforge_providers::{
    Notification, ProviderAdapter, ProviderError, ProviderSettings, RawNotification, RemoteStatus,
};
use serde_json::json;
use tokio::sync::broadcast;

pub const KIND: ProviderKind = ProviderKind::ImageA;
pub const OWNER: DbId = 7;
pub const COST: i64 = 10;
pub const PUSH_TOKEN: &str = "push-secret";

// ---------------------------------------------------------------------------
// Scripted adapter
// ---------------------------------------------------------------------------

/// Adapter whose submit and poll answers are queued by the test.
///
/// With nothing queued, submit succeeds with `remote-<n>` and poll
/// reports the job as still running.
pub struct StubAdapter {
    kind: ProviderKind,
    submits: Mutex<VecDeque<Result<String, ProviderError>>>,
    polls: Mutex<HashMap<String, VecDeque<Result<RemoteStatus, ProviderError>>>>,
    submit_calls: AtomicU32,
    poll_calls: AtomicU32,
}

impl StubAdapter {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            submits: Mutex::new(VecDeque::new()),
            polls: Mutex::new(HashMap::new()),
            submit_calls: AtomicU32::new(0),
            poll_calls: AtomicU32::new(0),
        }
    }

    pub fn queue_submit(&self, result: Result<String, ProviderError>) {
        self.submits.lock().unwrap().push_back(result);
    }

    pub fn queue_poll(&self, remote_id: &str, result: Result<RemoteStatus, ProviderError>) {
        self.polls
            .lock()
            .unwrap()
            .entry(remote_id.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> u32 {
        self.poll_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for StubAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn validate(&self, params: &serde_json::Value) -> Result<(), ProviderError> {
        match params.get("prompt").and_then(|p| p.as_str()) {
            Some(p) if !p.trim().is_empty() => Ok(()),
            _ => Err(ProviderError::InvalidParams("prompt is required".into())),
        }
    }

    async fn submit(&self, _params: &serde_json::Value) -> Result<String, ProviderError> {
        let n = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let queued = self.submits.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| Ok(format!("remote-{n}")))
    }

    async fn poll(&self, remote_id: &str) -> Result<RemoteStatus, ProviderError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let queued = self
            .polls
            .lock()
            .unwrap()
            .get_mut(remote_id)
            .and_then(|q| q.pop_front());
        queued.unwrap_or(Ok(RemoteStatus::InProgress { progress: None }))
    }

    fn parse_notification(&self, raw: &RawNotification) -> Result<Notification, ProviderError> {
        if raw.header("x-token") != Some(PUSH_TOKEN) {
            return Err(ProviderError::MalformedNotification("bad token".into()));
        }
        let body: serde_json::Value = serde_json::from_slice(&raw.body)
            .map_err(|e| ProviderError::MalformedNotification(e.to_string()))?;
        let remote_id = body["remote_id"]
            .as_str()
            .ok_or_else(|| ProviderError::MalformedNotification("missing remote_id".into()))?
            .to_string();
        let status = match body["status"].as_str() {
            Some("succeeded") => RemoteStatus::Succeeded {
                assets: body["assets"]
                    .as_array()
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default(),
            },
            Some("failed") => RemoteStatus::Failed {
                reason: body["reason"].as_str().unwrap_or("failed").to_string(),
            },
            _ => RemoteStatus::in_progress(body["progress"].as_i64().map(|p| p as i16)),
        };
        Ok(Notification { remote_id, status })
    }
}

// ---------------------------------------------------------------------------
// Pushed payloads
// ---------------------------------------------------------------------------

pub fn push(body: serde_json::Value) -> RawNotification {
    RawNotification::new(body.to_string()).with_header("X-Token", PUSH_TOKEN)
}

pub fn push_succeeded(remote_id: &str, assets: &[&str]) -> RawNotification {
    push(json!({"remote_id": remote_id, "status": "succeeded", "assets": assets}))
}

pub fn push_failed(remote_id: &str, reason: &str) -> RawNotification {
    push(json!({"remote_id": remote_id, "status": "failed", "reason": reason}))
}

pub fn push_progress(remote_id: &str, progress: i64) -> RawNotification {
    push(json!({"remote_id": remote_id, "status": "running", "progress": progress}))
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Timings small enough that retry loops finish in milliseconds.
pub fn fast_config() -> EngineConfig {
    let fast = BackoffConfig {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        multiplier: 2.0,
        max_attempts: 3,
    };
    EngineConfig {
        dispatch_interval: Duration::from_millis(10),
        reconcile_interval: Duration::from_millis(20),
        stale_after: Duration::from_secs(30),
        retrieval_sweep_interval: Duration::from_millis(50),
        submit_backoff: fast.clone(),
        download_backoff: fast,
        max_retrieval_rounds: 3,
        claim_lease: Duration::from_secs(600),
        shutdown_grace: Duration::from_secs(1),
        providers: vec![ProviderConfig::new(
            KIND,
            ProviderSettings::new("http://stub.invalid", "key", PUSH_TOKEN),
        )
        .with_concurrency(2)
        .with_cost_units(COST)],
    }
}

pub struct Harness {
    pub service: JobService,
    pub adapter: Arc<StubAdapter>,
    pub store: Arc<MemoryJobStore>,
    pub ledger: Arc<MemoryLedger>,
    pub storage: Arc<MemoryStorage>,
    pub fetcher: Arc<MemoryFetcher>,
    pub bus: Arc<EventBus>,
    pub registry: Arc<ConnectionRegistry>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(fast_config(), false)
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::build(config, false)
    }

    /// Harness whose engine loops are running.
    pub fn started(config: EngineConfig) -> Self {
        Self::build(config, true)
    }

    fn build(config: EngineConfig, start: bool) -> Self {
        let adapter = Arc::new(StubAdapter::new(KIND));
        let store = Arc::new(MemoryJobStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MemoryFetcher::new());
        let bus = Arc::new(EventBus::new(256));
        let registry = Arc::new(ConnectionRegistry::new());

        let ctx = EngineContext::new(
            store.clone(),
            ledger.clone(),
            storage.clone(),
            fetcher.clone(),
            JobNotifier::new(Arc::clone(&registry), Arc::clone(&bus)),
        );
        let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![adapter.clone()];
        let service = if start {
            JobService::start(ctx, adapters, config)
        } else {
            JobService::new(ctx, adapters, config)
        };

        Self {
            service,
            adapter,
            store,
            ledger,
            storage,
            fetcher,
            bus,
            registry,
        }
    }

    pub fn engine(&self) -> &Arc<GenerationEngine> {
        self.service.engine(KIND).expect("stub provider is enabled")
    }

    /// Grant `amount` to the default owner.
    pub async fn fund(&self, amount: i64) {
        self.service.grant(OWNER, amount, Some("test")).await.unwrap();
    }

    pub async fn balance(&self) -> i64 {
        self.service.balance(OWNER).await.unwrap()
    }

    /// Create a job for the default owner.
    pub async fn create(&self) -> Job {
        self.service
            .create_job(OWNER, KIND, json!({"prompt": "a lighthouse at dusk"}))
            .await
            .unwrap()
    }

    /// Create and dispatch a job, returning it in Submitted state.
    pub async fn submitted(&self) -> Job {
        let job = self.create().await;
        self.engine().dispatch_once().await.unwrap();
        self.job(job.id).await
    }

    pub async fn job(&self, id: JobId) -> Job {
        self.service.get_job(id).await.unwrap()
    }

    /// Make a submitted job look quiet for a minute so the reconciler
    /// picks it up.
    pub fn make_stale(&self, id: JobId) {
        self.store.backdate(id, chrono::Duration::minutes(1));
    }
}

/// Drain every event currently buffered on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<PlatformEvent>) -> Vec<PlatformEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}
