//! The job service facade: creation gates, queries and publishing.

mod common;

use assert_matches::assert_matches;
use common::{push_succeeded, Harness, COST, KIND, OWNER};
use genforge_core::job::JobState;
use genforge_core::provider::ProviderKind;
use genforge_core::types::new_job_id;
use genforge_db::models::job::JobFilter;
use genforge_pipeline::{EngineError, LedgerError};
use genforge_providers::ProviderError;
use serde_json::json;

// ---------------------------------------------------------------------------
// Test: creation is refused without enough balance and creates nothing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn insufficient_balance_creates_no_job() {
    let h = Harness::new();
    h.fund(COST - 1).await;

    let result = h
        .service
        .create_job(OWNER, KIND, json!({"prompt": "a cat"}))
        .await;

    assert_matches!(
        result,
        Err(EngineError::InsufficientBalance { balance, required })
            if balance == COST - 1 && required == COST
    );
    assert!(h.store.all().is_empty());
    assert_eq!(h.balance().await, COST - 1);
}

// ---------------------------------------------------------------------------
// Test: invalid parameters are rejected before any debit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_params_are_rejected_before_debit() {
    let h = Harness::new();
    h.fund(100).await;

    let result = h.service.create_job(OWNER, KIND, json!({"prompt": "  "})).await;

    assert_matches!(result, Err(EngineError::InvalidParams(msg)) if msg == "prompt is required");
    assert!(h.store.all().is_empty());
    assert_eq!(h.balance().await, 100);
}

// ---------------------------------------------------------------------------
// Test: jobs for providers without an engine are refused
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disabled_provider_is_refused() {
    let h = Harness::new();
    h.fund(100).await;

    let result = h
        .service
        .create_job(OWNER, ProviderKind::Video, json!({"prompt": "waves"}))
        .await;

    assert_matches!(result, Err(EngineError::ProviderNotEnabled(ProviderKind::Video)));
    assert_eq!(h.service.enabled_providers(), vec![KIND]);
}

// ---------------------------------------------------------------------------
// Test: a created job is Pending, priced and debited
// ---------------------------------------------------------------------------

#[tokio::test]
async fn created_job_is_pending_and_debited() {
    let h = Harness::new();
    h.fund(100).await;

    let job = h.create().await;

    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.owner_id, OWNER);
    assert_eq!(job.cost_units, COST);
    assert!(job.remote_id.is_none());
    assert_eq!(h.balance().await, 100 - COST);
    assert_eq!(h.service.get_job(job.id).await.unwrap(), job);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let h = Harness::new();
    let id = new_job_id();

    assert_matches!(h.service.get_job(id).await, Err(EngineError::NotFound(missing)) if missing == id);
}

// ---------------------------------------------------------------------------
// Test: listing filters by finished state and paginates newest first
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_jobs_filters_and_paginates() {
    let h = Harness::new();
    h.fund(100).await;
    h.adapter
        .queue_submit(Err(ProviderError::Rejected("nope".into())));
    let failed = h.create().await;
    h.engine().dispatch_once().await.unwrap();
    let first = h.create().await;
    let second = h.create().await;

    let unfinished = h
        .service
        .list_jobs(
            OWNER,
            &JobFilter {
                finished: Some(false),
                ..JobFilter::default()
            },
        )
        .await
        .unwrap();
    let ids: Vec<_> = unfinished.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);

    let finished = h
        .service
        .list_jobs(
            OWNER,
            &JobFilter {
                finished: Some(true),
                ..JobFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].id, failed.id);

    let page = h
        .service
        .list_jobs(
            OWNER,
            &JobFilter {
                limit: Some(1),
                offset: Some(1),
                ..JobFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, first.id);

    assert!(h.service.list_jobs(OWNER + 1, &JobFilter::default()).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Test: only the owner's completed jobs can be published
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publishing_requires_completed_job_of_owner() {
    let h = Harness::new();
    h.fund(100).await;
    h.fetcher.serve("https://cdn.test/p.png", b"img".to_vec(), "image/png");
    let job = h.submitted().await;

    assert_matches!(
        h.service.set_published(OWNER, job.id, true).await,
        Err(EngineError::InvalidParams(_))
    );

    h.engine()
        .handle_notification(&push_succeeded(
            job.remote_id.as_deref().unwrap(),
            &["https://cdn.test/p.png"],
        ))
        .await
        .unwrap();
    h.engine().retrieve_job(job.id).await.unwrap();

    assert_matches!(
        h.service.set_published(OWNER + 1, job.id, true).await,
        Err(EngineError::NotFound(_))
    );

    let published = h.service.set_published(OWNER, job.id, true).await.unwrap();
    assert!(published.published);
    assert_eq!(published.state, JobState::Completed);

    let unpublished = h.service.set_published(OWNER, job.id, false).await.unwrap();
    assert!(!unpublished.published);
}

// ---------------------------------------------------------------------------
// Test: grants must be positive
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_positive_grant_is_rejected() {
    let h = Harness::new();

    assert_matches!(
        h.service.grant(OWNER, 0, None).await,
        Err(EngineError::Ledger(LedgerError::InvalidAmount(0)))
    );
    assert_eq!(h.balance().await, 0);
}

// ---------------------------------------------------------------------------
// Test: notifications for disabled providers are refused
// ---------------------------------------------------------------------------

#[tokio::test]
async fn notification_for_disabled_provider_is_refused() {
    let h = Harness::new();

    let result = h
        .service
        .handle_notification(ProviderKind::Music, &push_succeeded("x", &["https://cdn.test/a"]))
        .await;

    assert_matches!(result, Err(EngineError::ProviderNotEnabled(ProviderKind::Music)));
}
