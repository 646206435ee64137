//! Integration tests for tracked repository operations.
//!
//! These tests require the `sqlite` and `migrate` features to be enabled
//! and use an in-memory SQLite database.

#![cfg(all(feature = "sqlite", feature = "migrate"))]

use chrono::{Duration, Utc};
use devpulse::connect_and_migrate;
use devpulse::entity::prelude::*;
use devpulse::repository::{
    self, NewRepository, Pagination, RepositoryError, advance_last_sync_at, find_all,
    find_by_natural_key,
};
use devpulse::sync::jobs;
use sea_orm::DatabaseConnection;

/// Create an in-memory SQLite database with migrations applied.
async fn setup_test_db() -> DatabaseConnection {
    connect_and_migrate("sqlite::memory:")
        .await
        .expect("Failed to create test database")
}

fn new_repo(project: &str, name: &str) -> NewRepository {
    NewRepository {
        name: name.to_string(),
        organization: "contoso".to_string(),
        project: project.to_string(),
        base_url: "https://dev.azure.com/".to_string(),
        external_id: Some(format!("{project}-{name}")),
        credential: None,
    }
}

// ─── Insert Tests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_insert_normalizes_base_url() {
    let db = setup_test_db().await;

    let repo = repository::insert(&db, new_repo("platform", "api")).await.unwrap();
    assert_eq!(repo.base_url, "https://dev.azure.com");
    assert!(repo.enabled);
    assert!(repo.last_sync_at.is_none());
    assert_eq!(repo.full_name(), "contoso/platform/api");

    let found = find_by_natural_key(&db, "https://dev.azure.com/", "contoso", "platform", "api")
        .await
        .unwrap()
        .expect("lookup ignores the trailing slash");
    assert_eq!(found.id, repo.id);
}

#[tokio::test]
async fn test_insert_rejects_duplicates() {
    let db = setup_test_db().await;

    repository::insert(&db, new_repo("platform", "api")).await.unwrap();
    let err = repository::insert(&db, new_repo("platform", "api"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Duplicate { .. }));

    // Same name in another project is a different repository.
    repository::insert(&db, new_repo("mobile", "api")).await.unwrap();
    assert_eq!(repository::count(&db).await.unwrap(), 2);
}

#[tokio::test]
async fn test_insert_rejects_blank_fields() {
    let db = setup_test_db().await;

    let err = repository::insert(&db, new_repo("  ", "api")).await.unwrap_err();
    match err {
        RepositoryError::InvalidInput { message } => assert!(message.contains("project")),
        other => panic!("expected InvalidInput, got {other:?}"),
    }
    assert_eq!(repository::count(&db).await.unwrap(), 0);
}

// ─── Query Tests ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_find_all_paginates_in_path_order() {
    let db = setup_test_db().await;
    for (project, name) in [("web", "b"), ("api", "z"), ("web", "a"), ("api", "c")] {
        repository::insert(&db, new_repo(project, name)).await.unwrap();
    }

    let first = find_all(&db, Pagination::new(0, 3)).await.unwrap();
    assert_eq!(first.total, 4);
    assert_eq!(first.total_pages, 2);
    let names: Vec<_> = first.items.iter().map(|r| r.full_name()).collect();
    assert_eq!(
        names,
        ["contoso/api/c", "contoso/api/z", "contoso/web/a"]
    );

    let second = find_all(&db, Pagination::new(1, 3)).await.unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].full_name(), "contoso/web/b");
}

#[tokio::test]
async fn test_disabled_repositories_leave_batches() {
    let db = setup_test_db().await;
    let api = repository::insert(&db, new_repo("platform", "api")).await.unwrap();
    repository::insert(&db, new_repo("platform", "web")).await.unwrap();

    let updated = repository::set_enabled(&db, api.id, false).await.unwrap();
    assert!(!updated.enabled);
    assert_eq!(repository::count_enabled(&db).await.unwrap(), 1);
    assert!(
        repository::list_enabled(&db)
            .await
            .unwrap()
            .iter()
            .all(|r| r.id != api.id)
    );

    let missing = repository::set_enabled(&db, uuid::Uuid::new_v4(), true).await;
    assert!(matches!(missing, Err(RepositoryError::NotFound { .. })));
}

// ─── Sync Bookkeeping Tests ──────────────────────────────────────────────────

#[tokio::test]
async fn test_last_sync_at_never_moves_backwards() {
    let db = setup_test_db().await;
    let repo = repository::insert(&db, new_repo("platform", "api")).await.unwrap();
    let now = Utc::now();

    assert!(advance_last_sync_at(&db, repo.id, now).await.unwrap());
    assert!(
        !advance_last_sync_at(&db, repo.id, now - Duration::minutes(5))
            .await
            .unwrap()
    );
    assert!(
        advance_last_sync_at(&db, repo.id, now + Duration::minutes(5))
            .await
            .unwrap()
    );

    let stored = repository::get(&db, repo.id).await.unwrap();
    assert_eq!(
        stored.last_sync_at,
        Some((now + Duration::minutes(5)).fixed_offset())
    );
}

#[tokio::test]
async fn test_delete_removes_job_history() {
    let db = setup_test_db().await;
    let repo = repository::insert(&db, new_repo("platform", "api")).await.unwrap();
    jobs::create_running(&db, repo.id, SyncType::Full, None, Utc::now())
        .await
        .unwrap();

    assert_eq!(repository::delete(&db, repo.id).await.unwrap(), 1);
    assert!(repository::find_by_id(&db, repo.id).await.unwrap().is_none());
    assert!(jobs::latest(&db, repo.id).await.unwrap().is_none());
    assert_eq!(repository::delete(&db, repo.id).await.unwrap(), 0);
}
