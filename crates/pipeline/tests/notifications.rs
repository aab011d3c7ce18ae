//! Pushed notifications and their interplay with polling.

mod common;

use assert_matches::assert_matches;
use common::{push_failed, push_progress, push_succeeded, Harness, COST};
use genforge_core::job::JobState;
use genforge_core::job_events::EVENT_JOB_PROGRESS;
use genforge_pipeline::{IgnoreReason, IntakeOutcome, RetrievalOutcome};
use genforge_providers::{RawNotification, RemoteStatus};

// ---------------------------------------------------------------------------
// Test: a push that arrives before the sweep makes the sweep a no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn push_before_sweep_short_circuits_polling() {
    let h = Harness::new();
    h.fund(100).await;
    let job = h.submitted().await;
    let remote_id = job.remote_id.clone().unwrap();

    let outcome = h
        .engine()
        .handle_notification(&push_succeeded(&remote_id, &["https://cdn.test/x.png"]))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        IntakeOutcome::Applied {
            job_id: job.id,
            state: JobState::Succeeded,
        }
    );

    h.make_stale(job.id);
    let report = h.engine().reconcile_once().await.unwrap();

    assert_eq!(report.examined, 0);
    assert_eq!(h.adapter.poll_calls(), 0);
}

// ---------------------------------------------------------------------------
// Test: a duplicate push after completion changes nothing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_push_after_completion_is_ignored() {
    let h = Harness::new();
    h.fund(100).await;
    h.fetcher.serve("https://cdn.test/x.png", b"img".to_vec(), "image/png");
    let job = h.submitted().await;
    let remote_id = job.remote_id.clone().unwrap();
    let raw = push_succeeded(&remote_id, &["https://cdn.test/x.png"]);

    h.engine().handle_notification(&raw).await.unwrap();
    let retrieved = h.engine().retrieve_job(job.id).await.unwrap();
    assert_matches!(retrieved, RetrievalOutcome::Completed(_));
    let completed = h.job(job.id).await;

    let again = h.engine().handle_notification(&raw).await.unwrap();

    assert_eq!(again, IntakeOutcome::Ignored(IgnoreReason::AlreadySettled));
    assert_eq!(h.job(job.id).await, completed);
    assert_eq!(h.fetcher.calls("https://cdn.test/x.png"), 1);
}

// ---------------------------------------------------------------------------
// Test: a failure arriving by poll and by push at once refunds exactly once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_poll_and_push_failure_refund_once() {
    let h = Harness::new();
    h.fund(100).await;
    let job = h.submitted().await;
    let remote_id = job.remote_id.clone().unwrap();
    h.make_stale(job.id);
    h.adapter.queue_poll(
        &remote_id,
        Ok(RemoteStatus::Failed {
            reason: "moderation".into(),
        }),
    );
    let raw = push_failed(&remote_id, "moderation");

    let engine = h.engine();
    let (swept, pushed) = tokio::join!(engine.reconcile_once(), engine.handle_notification(&raw));
    swept.unwrap();
    pushed.unwrap();

    let job = h.job(job.id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(h.balance().await, 100);

    let entries = h.service.ledger_entries(common::OWNER, 10, 0).await.unwrap();
    let for_job = entries.iter().filter(|e| e.job_id == Some(job.id)).count();
    assert_eq!(for_job, 2, "one debit and one refund");
}

// ---------------------------------------------------------------------------
// Test: the push and poll race in either order converges on one state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn push_after_poll_settled_is_ignored() {
    let h = Harness::new();
    h.fund(100).await;
    let job = h.submitted().await;
    let remote_id = job.remote_id.clone().unwrap();
    h.make_stale(job.id);
    h.adapter.queue_poll(
        &remote_id,
        Ok(RemoteStatus::Failed {
            reason: "timeout".into(),
        }),
    );

    h.engine().reconcile_once().await.unwrap();
    let outcome = h
        .engine()
        .handle_notification(&push_succeeded(&remote_id, &["https://cdn.test/late.png"]))
        .await
        .unwrap();

    assert_eq!(outcome, IntakeOutcome::Ignored(IgnoreReason::AlreadySettled));
    let job = h.job(job.id).await;
    assert_eq!(job.state, JobState::Failed);
    assert!(job.result_assets.is_empty());
}

// ---------------------------------------------------------------------------
// Test: unknown remote ids and unauthenticated pushes are not applied
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_remote_id_is_ignored() {
    let h = Harness::new();

    let outcome = h
        .engine()
        .handle_notification(&push_succeeded("nobody", &["https://cdn.test/x.png"]))
        .await
        .unwrap();

    assert_eq!(outcome, IntakeOutcome::Ignored(IgnoreReason::UnknownRemoteId));
}

#[tokio::test]
async fn unauthenticated_push_is_dropped() {
    let h = Harness::new();
    h.fund(100).await;
    let job = h.submitted().await;
    let body = serde_json::json!({
        "remote_id": job.remote_id,
        "status": "failed",
        "reason": "forged",
    });

    let outcome = h
        .engine()
        .handle_notification(&RawNotification::new(body.to_string()))
        .await
        .unwrap();

    assert_matches!(outcome, IntakeOutcome::Dropped { .. });
    assert_eq!(h.job(job.id).await.state, JobState::Submitted);
    assert_eq!(h.balance().await, 100 - COST);
}

// ---------------------------------------------------------------------------
// Test: progress pushes are recorded and only increases are announced
// ---------------------------------------------------------------------------

#[tokio::test]
async fn progress_push_records_and_announces_increase() {
    let h = Harness::new();
    h.fund(100).await;
    let job = h.submitted().await;
    let remote_id = job.remote_id.clone().unwrap();
    let mut events = h.bus.subscribe();

    let first = h
        .engine()
        .handle_notification(&push_progress(&remote_id, 40))
        .await
        .unwrap();
    let second = h
        .engine()
        .handle_notification(&push_progress(&remote_id, 20))
        .await
        .unwrap();

    assert_eq!(first, IntakeOutcome::ProgressRecorded { job_id: job.id });
    assert_eq!(second, IntakeOutcome::ProgressRecorded { job_id: job.id });
    let job = h.job(job.id).await;
    assert_eq!(job.state, JobState::Submitted);
    assert_eq!(job.progress, 40);

    let progress_events: Vec<_> = common::drain(&mut events)
        .into_iter()
        .filter(|e| e.event_type == EVENT_JOB_PROGRESS)
        .collect();
    assert_eq!(progress_events.len(), 1);
    assert_eq!(progress_events[0].payload["progress"], 40);
}

// ---------------------------------------------------------------------------
// Test: a connected owner receives state changes on their live connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn owner_connection_receives_state_changes() {
    let h = Harness::new();
    h.fund(100).await;
    let mut rx = h.registry.add("conn-1".to_string(), common::OWNER).await;

    let job = h.submitted().await;

    let mut states = Vec::new();
    while let Ok(genforge_events::registry::Outbound::Text(text)) = rx.try_recv() {
        let msg: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(msg["job_id"], job.id.to_string());
        states.push(msg["state"].as_str().unwrap().to_string());
    }
    assert_eq!(states, vec!["pending", "submitted"]);
}
