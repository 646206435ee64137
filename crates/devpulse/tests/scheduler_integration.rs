//! Integration tests for scheduler batches, state persistence and batch
//! notifications.

#![cfg(all(feature = "sqlite", feature = "migrate"))]

mod common;

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use devpulse::entity::prelude::*;
use devpulse::platform::PlatformError;
use devpulse::repository;
use devpulse::sync::{DbLeaseStore, LeaseStore, jobs};
use devpulse::{NotificationService, SchedulerConfig, SchedulerError, SyncScheduler};

fn notifying_config(threshold: u32) -> SchedulerConfig {
    SchedulerConfig {
        notification_enabled: true,
        notification_recipients: vec!["ops@contoso.com".to_string(), "lead@contoso.com".to_string()],
        failure_notification_threshold: threshold,
        ..test_config()
    }
}

#[tokio::test]
async fn run_now_syncs_enabled_repositories() {
    let source = Arc::new(FakeSource::new());
    source.set_commits(vec![commit("c1", person("ada"), at(1, 8))]);
    let runtime = setup_runtime(Arc::clone(&source)).await;
    let db = runtime.database();

    let api = insert_repository(db.as_ref(), "api").await;
    let web = insert_repository(db.as_ref(), "web").await;
    let busy = insert_repository(db.as_ref(), "busy").await;
    let disabled = insert_repository(db.as_ref(), "legacy").await;
    repository::set_enabled(db.as_ref(), disabled.id, false)
        .await
        .unwrap();

    DbLeaseStore::new(Arc::clone(db))
        .acquire(
            &busy.id.to_string(),
            "other-process",
            ChronoDuration::minutes(5),
            Utc::now(),
        )
        .await
        .unwrap()
        .expect("lease should be free");

    let summary = tokio::time::timeout(SYNC_TIMEOUT, runtime.scheduler().run_now())
        .await
        .expect("batch timed out")
        .unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.successful, 2);
    assert_eq!(summary.deferred, 1);
    assert_eq!(summary.failed, 0);
    assert!(summary.errors.is_empty());
    assert!(summary.finished_at.is_some());

    for repo in [&api, &web] {
        let job = jobs::latest(db.as_ref(), repo.id).await.unwrap().unwrap();
        assert_eq!(job.batch_id, Some(summary.batch_id));
        // Never synced before: the batch picks a full sync.
        assert_eq!(job.sync_type, SyncType::Full);
    }
    assert!(jobs::latest(db.as_ref(), disabled.id).await.unwrap().is_none());
    assert!(jobs::latest(db.as_ref(), busy.id).await.unwrap().is_none());

    let status = runtime.scheduler().get_status().await.unwrap();
    assert!(!status.batch_running);
    assert!(!status.timer_active);
    assert_eq!(status.last_batch_id, Some(summary.batch_id));
    assert_eq!(status.current_batch_id, None);
    assert_eq!(status.total_repos_processed, 3);
    assert_eq!(status.successful_syncs, 2);
    assert_eq!(status.deferred_syncs, 1);
    assert!(status.last_run_at.is_some());
    assert!(status.next_run_at.is_none());
    assert!(status.last_error.is_none());

    // Second batch: repositories with a last sync run incrementally.
    let second = runtime.scheduler().run_now().await.unwrap();
    let job = jobs::latest(db.as_ref(), api.id).await.unwrap().unwrap();
    assert_eq!(job.batch_id, Some(second.batch_id));
    assert_eq!(job.sync_type, SyncType::Incremental);
    assert_eq!(
        runtime.scheduler().get_status().await.unwrap().total_repos_processed,
        6
    );
}

#[tokio::test]
async fn overlapping_batch_is_rejected() {
    let source = Arc::new(FakeSource::gated());
    let runtime = setup_runtime(Arc::clone(&source)).await;
    insert_repository(runtime.database().as_ref(), "api").await;

    let first = {
        let scheduler = Arc::clone(runtime.scheduler());
        tokio::spawn(async move { scheduler.run_now().await })
    };
    source.wait_entered().await;
    assert!(runtime.scheduler().is_batch_running());

    let second = runtime.scheduler().run_now().await;
    assert!(matches!(second, Err(SchedulerError::AlreadyRunning)));

    let status = runtime.scheduler().get_status().await.unwrap();
    assert!(status.batch_running);
    assert!(status.current_batch_id.is_some());

    source.open(100);
    let first = tokio::time::timeout(SYNC_TIMEOUT, first)
        .await
        .expect("batch timed out")
        .unwrap()
        .unwrap();
    assert_eq!(first.successful, 1);
    assert!(!runtime.scheduler().is_batch_running());
}

#[tokio::test]
async fn failed_batch_sends_failure_digest() {
    let source = Arc::new(FakeSource::new());
    source.fail_next(PlatformError::auth("token revoked"));
    let runtime = setup_runtime_with(Arc::clone(&source), notifying_config(1)).await;
    let db = runtime.database().as_ref();
    insert_repository(db, "api").await;
    insert_repository(db, "web").await;

    let summary = runtime.scheduler().run_now().await.unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.successful, 1);
    assert!(summary.errors[0].contains("token revoked"));

    for recipient in ["ops@contoso.com", "lead@contoso.com"] {
        let unread = runtime.notifications().list_unread(recipient).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, NotificationKind::SyncFailure);
        assert_eq!(unread[0].target_entity_id, summary.batch_id.to_string());
        assert_eq!(unread[0].metadata["failure_count"], 1);
    }

    let status = runtime.scheduler().get_status().await.unwrap();
    assert_eq!(status.failed_syncs, 1);
    assert!(status.last_error.unwrap().contains("token revoked"));

    // A clean batch afterwards sends a success notification and clears the error.
    let clean = runtime.scheduler().run_now().await.unwrap();
    assert_eq!(clean.failed, 0);
    let unread = runtime
        .notifications()
        .list_unread("ops@contoso.com")
        .await
        .unwrap();
    assert_eq!(unread.len(), 2);
    assert_eq!(unread[0].kind, NotificationKind::SyncSuccess);
    assert!(runtime.scheduler().get_status().await.unwrap().last_error.is_none());
}

#[tokio::test]
async fn failures_below_threshold_stay_quiet() {
    let source = Arc::new(FakeSource::new());
    source.fail_next(PlatformError::auth("token revoked"));
    let runtime = setup_runtime_with(Arc::clone(&source), notifying_config(2)).await;
    insert_repository(runtime.database().as_ref(), "api").await;

    let summary = runtime.scheduler().run_now().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert!(
        runtime
            .notifications()
            .list_unread("ops@contoso.com")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn empty_batch_sends_nothing() {
    let source = Arc::new(FakeSource::new());
    let runtime = setup_runtime_with(Arc::clone(&source), notifying_config(1)).await;

    let summary = runtime.scheduler().run_now().await.unwrap();
    assert_eq!(summary.total, 0);
    assert_eq!(source.calls(), 0);
    assert!(
        runtime
            .notifications()
            .list_unread("ops@contoso.com")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn start_and_stop_manage_the_timer() {
    let source = Arc::new(FakeSource::new());
    let runtime = setup_runtime(source).await;
    let scheduler = runtime.scheduler();

    assert!(scheduler.start().await.unwrap());
    assert!(!scheduler.start().await.unwrap());
    let status = scheduler.get_status().await.unwrap();
    assert!(status.timer_active);
    let next = status.next_run_at.expect("next run scheduled");
    assert!(next > Utc::now() + ChronoDuration::minutes(59));

    assert!(scheduler.stop().await.unwrap());
    assert!(!scheduler.stop().await.unwrap());
    let status = scheduler.get_status().await.unwrap();
    assert!(!status.timer_active);
    assert!(status.next_run_at.is_none());

    assert!(scheduler.shutdown(std::time::Duration::from_millis(50)).await.unwrap());
}

#[tokio::test]
async fn config_updates_are_persisted_and_applied() {
    let source = Arc::new(FakeSource::new());
    let runtime = setup_runtime(Arc::clone(&source)).await;
    let scheduler = runtime.scheduler();

    let invalid = scheduler
        .update_config(SchedulerConfig {
            max_concurrent_repos: 0,
            ..scheduler.get_config()
        })
        .await;
    assert!(matches!(invalid, Err(SchedulerError::InvalidConfig { .. })));

    let mut config = scheduler.get_config();
    config.set("interval_minutes", "15").unwrap();
    config.set("azure_rate_limit_per_minute", "120").unwrap();
    config.set("azure_burst_limit", "30").unwrap();
    scheduler.start().await.unwrap();
    scheduler.update_config(config.clone()).await.unwrap();

    assert_eq!(scheduler.get_config(), config);
    let limits = runtime.limiter().status();
    assert_eq!(limits.per_minute, 120);
    assert_eq!(limits.capacity, 30);
    assert_eq!(runtime.orchestrator().options().page_size, config.page_size);

    // The interval changed, so the timer was restarted with it.
    assert!(scheduler.is_timer_active());
    let next = scheduler.get_status().await.unwrap().next_run_at.unwrap();
    assert!(next <= Utc::now() + ChronoDuration::minutes(15));
    scheduler.stop().await.unwrap();

    // A scheduler loaded later prefers the persisted configuration.
    let reloaded = SyncScheduler::load(
        Arc::clone(runtime.database()),
        runtime.orchestrator().clone(),
        NotificationService::new(Arc::clone(runtime.database())),
        SchedulerConfig::default(),
        None,
    )
    .await
    .unwrap();
    assert_eq!(reloaded.get_config().interval_minutes, 15);
    assert_eq!(reloaded.get_config().azure_burst_limit, 30);
}
