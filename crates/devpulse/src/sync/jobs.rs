//! Persistence of sync job rows.
//!
//! A job moves `running -> completed | failed | cancelled` exactly once.
//! Updates are filtered on `status = running`, so a terminal row is never
//! rewritten.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::entity::job_status::{JobStatus, SyncType};
use crate::entity::sync_job::{ActiveModel, Column, Entity as SyncJob, Model};

/// Default number of rows returned by [`history`].
pub const DEFAULT_HISTORY_LIMIT: u64 = 20;

/// Insert a job that is already running.
pub async fn create_running<C: ConnectionTrait>(
    db: &C,
    repository_id: Uuid,
    sync_type: SyncType,
    batch_id: Option<Uuid>,
    started_at: DateTime<Utc>,
) -> Result<Model, DbErr> {
    let started_at = started_at.fixed_offset();
    ActiveModel {
        id: Set(Uuid::new_v4()),
        repository_id: Set(repository_id),
        batch_id: Set(batch_id),
        status: Set(JobStatus::Running),
        sync_type: Set(sync_type),
        started_at: Set(Some(started_at)),
        completed_at: Set(None),
        error: Set(None),
        records_processed: Set(0),
        cancel_requested: Set(false),
        created_at: Set(started_at),
    }
    .insert(db)
    .await
}

/// Move a running job to a terminal status.
///
/// Returns `false` when the job was not running (already finished).
pub async fn finish<C: ConnectionTrait>(
    db: &C,
    job_id: Uuid,
    status: JobStatus,
    records_processed: usize,
    error: Option<String>,
    completed_at: DateTime<Utc>,
) -> Result<bool, DbErr> {
    debug_assert!(status.is_terminal());

    let result = SyncJob::update_many()
        .col_expr(Column::Status, Expr::value(status))
        .col_expr(
            Column::RecordsProcessed,
            Expr::value(records_processed as i64),
        )
        .col_expr(Column::Error, Expr::value(error))
        .col_expr(Column::CompletedAt, Expr::value(completed_at.fixed_offset()))
        .filter(Column::Id.eq(job_id))
        .filter(Column::Status.eq(JobStatus::Running))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Record progress on a running job.
pub async fn record_progress<C: ConnectionTrait>(
    db: &C,
    job_id: Uuid,
    records_processed: usize,
) -> Result<(), DbErr> {
    SyncJob::update_many()
        .col_expr(
            Column::RecordsProcessed,
            Expr::value(records_processed as i64),
        )
        .filter(Column::Id.eq(job_id))
        .filter(Column::Status.eq(JobStatus::Running))
        .exec(db)
        .await?;
    Ok(())
}

/// Flag every running job of a repository for cancellation.
///
/// Returns the number of jobs flagged.
pub async fn request_cancel<C: ConnectionTrait>(db: &C, repository_id: Uuid) -> Result<u64, DbErr> {
    let result = SyncJob::update_many()
        .col_expr(Column::CancelRequested, Expr::value(true))
        .filter(Column::RepositoryId.eq(repository_id))
        .filter(Column::Status.eq(JobStatus::Running))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

pub async fn is_cancel_requested<C: ConnectionTrait>(db: &C, job_id: Uuid) -> Result<bool, DbErr> {
    Ok(SyncJob::find_by_id(job_id)
        .one(db)
        .await?
        .is_some_and(|job| job.cancel_requested))
}

/// Most recent job of a repository.
pub async fn latest<C: ConnectionTrait>(db: &C, repository_id: Uuid) -> Result<Option<Model>, DbErr> {
    SyncJob::find()
        .filter(Column::RepositoryId.eq(repository_id))
        .order_by_desc(Column::CreatedAt)
        .one(db)
        .await
}

/// Most recent jobs of a repository, newest first.
pub async fn history<C: ConnectionTrait>(
    db: &C,
    repository_id: Uuid,
    limit: u64,
) -> Result<Vec<Model>, DbErr> {
    SyncJob::find()
        .filter(Column::RepositoryId.eq(repository_id))
        .order_by_desc(Column::CreatedAt)
        .limit(limit)
        .all(db)
        .await
}

/// Fail jobs left `running` by a process that died.
///
/// Only jobs started before `started_before` are touched, so live jobs of
/// other processes with fresh leases are left alone. Returns the count.
pub async fn recover_interrupted<C: ConnectionTrait>(
    db: &C,
    started_before: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<u64, DbErr> {
    let result = SyncJob::update_many()
        .col_expr(Column::Status, Expr::value(JobStatus::Failed))
        .col_expr(
            Column::Error,
            Expr::value(Some("interrupted: process stopped while running".to_string())),
        )
        .col_expr(Column::CompletedAt, Expr::value(now.fixed_offset()))
        .filter(Column::Status.eq(JobStatus::Running))
        .filter(Column::StartedAt.lt(started_before.fixed_offset()))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

#[cfg(all(test, feature = "sqlite", feature = "migrate"))]
mod tests {
    use chrono::Duration;
    use sea_orm::DatabaseConnection;

    use super::*;
    use crate::repository::{NewRepository, insert};

    async fn setup() -> (DatabaseConnection, Uuid) {
        let db = crate::connect_and_migrate("sqlite::memory:")
            .await
            .expect("test db should migrate");
        let repo = insert(
            &db,
            NewRepository {
                name: "api".into(),
                organization: "contoso".into(),
                project: "platform".into(),
                base_url: "https://dev.azure.com".into(),
                external_id: None,
                credential: None,
            },
        )
        .await
        .expect("repo should insert");
        (db, repo.id)
    }

    #[tokio::test]
    async fn terminal_jobs_are_immutable() {
        let (db, repo_id) = setup().await;
        let job = create_running(&db, repo_id, SyncType::Incremental, None, Utc::now())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Running);

        assert!(
            finish(&db, job.id, JobStatus::Completed, 7, None, Utc::now())
                .await
                .unwrap()
        );
        assert!(
            !finish(
                &db,
                job.id,
                JobStatus::Failed,
                0,
                Some("late".into()),
                Utc::now()
            )
            .await
            .unwrap()
        );

        let stored = latest(&db, repo_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.records_processed, 7);
        assert!(stored.error.is_none());
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancel_flag_only_marks_running_jobs() {
        let (db, repo_id) = setup().await;
        assert_eq!(request_cancel(&db, repo_id).await.unwrap(), 0);

        let job = create_running(&db, repo_id, SyncType::Full, None, Utc::now())
            .await
            .unwrap();
        assert!(!is_cancel_requested(&db, job.id).await.unwrap());
        assert_eq!(request_cancel(&db, repo_id).await.unwrap(), 1);
        assert!(is_cancel_requested(&db, job.id).await.unwrap());
        assert_eq!(latest(&db, repo_id).await.unwrap().map(|j| j.id), Some(job.id));
    }

    #[tokio::test]
    async fn history_is_newest_first_and_limited() {
        let (db, repo_id) = setup().await;
        let base = Utc::now() - Duration::hours(3);
        for i in 0..3 {
            let job = create_running(
                &db,
                repo_id,
                SyncType::Incremental,
                None,
                base + Duration::hours(i),
            )
            .await
            .unwrap();
            finish(&db, job.id, JobStatus::Completed, 0, None, Utc::now())
                .await
                .unwrap();
        }

        let rows = history(&db, repo_id, 2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].created_at > rows[1].created_at);
    }

    #[tokio::test]
    async fn recovery_fails_only_stale_running_jobs() {
        let (db, repo_id) = setup().await;
        let now = Utc::now();
        let stale = create_running(&db, repo_id, SyncType::Full, None, now - Duration::hours(5))
            .await
            .unwrap();
        let fresh = create_running(&db, repo_id, SyncType::Full, None, now)
            .await
            .unwrap();

        let recovered = recover_interrupted(&db, now - Duration::hours(1), now)
            .await
            .unwrap();
        assert_eq!(recovered, 1);

        let rows = history(&db, repo_id, 10).await.unwrap();
        let stale_row = rows.iter().find(|j| j.id == stale.id).unwrap();
        let fresh_row = rows.iter().find(|j| j.id == fresh.id).unwrap();
        assert_eq!(stale_row.status, JobStatus::Failed);
        assert_eq!(fresh_row.status, JobStatus::Running);
    }
}
