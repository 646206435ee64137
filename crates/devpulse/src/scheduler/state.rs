//! Persistence of the singleton `scheduler_state` row.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::entity::scheduler_state::{
    ActiveModel, Column, Entity as SchedulerState, Model, SINGLETON_ID,
};

use super::{SchedulerConfig, SchedulerError};

/// Counters of one finished batch, added to the cumulative totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounters {
    pub processed: i64,
    pub successful: i64,
    pub failed: i64,
    pub deferred: i64,
}

/// Read the state row, creating it on first use.
pub async fn load_or_init<C: ConnectionTrait>(db: &C) -> Result<Model, DbErr> {
    if let Some(state) = SchedulerState::find_by_id(SINGLETON_ID).one(db).await? {
        return Ok(state);
    }

    let model = ActiveModel {
        id: Set(SINGLETON_ID),
        is_running: Set(false),
        last_run_at: Set(None),
        next_run_at: Set(None),
        current_batch_id: Set(None),
        last_batch_id: Set(None),
        total_repos_processed: Set(0),
        successful_syncs: Set(0),
        failed_syncs: Set(0),
        deferred_syncs: Set(0),
        last_error: Set(None),
        config: Set(None),
        updated_at: Set(Utc::now().fixed_offset()),
    };

    SchedulerState::insert(model)
        .on_conflict(OnConflict::column(Column::Id).do_nothing().to_owned())
        .exec_without_returning(db)
        .await?;

    SchedulerState::find_by_id(SINGLETON_ID)
        .one(db)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound("scheduler_state".to_string()))
}

/// Clear a running flag left behind by a process that died mid-batch.
///
/// Returns `true` when a stale flag was reset.
pub async fn reset_stale_running<C: ConnectionTrait>(db: &C) -> Result<bool, DbErr> {
    let result = SchedulerState::update_many()
        .col_expr(Column::IsRunning, Expr::value(false))
        .col_expr(Column::CurrentBatchId, Expr::value(Option::<Uuid>::None))
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
        .filter(Column::Id.eq(SINGLETON_ID))
        .filter(Column::IsRunning.eq(true))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Flip `is_running` on for `batch_id`. Returns `false` if a batch is already
/// marked running.
pub async fn mark_batch_started<C: ConnectionTrait>(
    db: &C,
    batch_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, DbErr> {
    let result = SchedulerState::update_many()
        .col_expr(Column::IsRunning, Expr::value(true))
        .col_expr(Column::CurrentBatchId, Expr::value(Some(batch_id)))
        .col_expr(Column::LastRunAt, Expr::value(Some(now.fixed_offset())))
        .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
        .filter(Column::Id.eq(SINGLETON_ID))
        .filter(Column::IsRunning.eq(false))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Record the end of a batch: add counters and set `next_run_at`.
///
/// The running flag is cleared only while it still belongs to `batch_id`.
/// A batch whose flag was reset and taken by a newer batch leaves the newer
/// flag alone. Returns whether the flag was cleared.
pub async fn mark_batch_finished<C: ConnectionTrait>(
    db: &C,
    batch_id: Uuid,
    counters: BatchCounters,
    next_run_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    now: DateTime<Utc>,
) -> Result<bool, DbErr> {
    SchedulerState::update_many()
        .col_expr(Column::LastBatchId, Expr::value(Some(batch_id)))
        .col_expr(
            Column::TotalReposProcessed,
            Expr::col(Column::TotalReposProcessed).add(counters.processed),
        )
        .col_expr(
            Column::SuccessfulSyncs,
            Expr::col(Column::SuccessfulSyncs).add(counters.successful),
        )
        .col_expr(Column::FailedSyncs, Expr::col(Column::FailedSyncs).add(counters.failed))
        .col_expr(
            Column::DeferredSyncs,
            Expr::col(Column::DeferredSyncs).add(counters.deferred),
        )
        .col_expr(
            Column::NextRunAt,
            Expr::value(next_run_at.map(|at| at.fixed_offset())),
        )
        .col_expr(Column::LastError, Expr::value(last_error))
        .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
        .filter(Column::Id.eq(SINGLETON_ID))
        .exec(db)
        .await?;

    let cleared = SchedulerState::update_many()
        .col_expr(Column::IsRunning, Expr::value(false))
        .col_expr(Column::CurrentBatchId, Expr::value(Option::<Uuid>::None))
        .filter(Column::Id.eq(SINGLETON_ID))
        .filter(Column::CurrentBatchId.eq(batch_id))
        .exec(db)
        .await?;
    Ok(cleared.rows_affected > 0)
}

pub async fn set_next_run_at<C: ConnectionTrait>(
    db: &C,
    next_run_at: Option<DateTime<Utc>>,
) -> Result<(), DbErr> {
    SchedulerState::update_many()
        .col_expr(
            Column::NextRunAt,
            Expr::value(next_run_at.map(|at| at.fixed_offset())),
        )
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
        .filter(Column::Id.eq(SINGLETON_ID))
        .exec(db)
        .await?;
    Ok(())
}

/// The persisted configuration, if one was ever saved.
pub async fn load_config<C: ConnectionTrait>(db: &C) -> Result<Option<SchedulerConfig>, SchedulerError> {
    let state = load_or_init(db).await?;
    state
        .config
        .map(serde_json::from_value)
        .transpose()
        .map_err(SchedulerError::from)
}

pub async fn save_config<C: ConnectionTrait>(
    db: &C,
    config: &SchedulerConfig,
) -> Result<(), SchedulerError> {
    load_or_init(db).await?;
    let value = serde_json::to_value(config)?;
    SchedulerState::update_many()
        .col_expr(Column::Config, Expr::value(Some(value)))
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
        .filter(Column::Id.eq(SINGLETON_ID))
        .exec(db)
        .await?;
    Ok(())
}

#[cfg(all(test, feature = "sqlite", feature = "migrate"))]
mod tests {
    use super::*;

    async fn db() -> sea_orm::DatabaseConnection {
        crate::db::connect_and_migrate("sqlite::memory:")
            .await
            .expect("test db should migrate")
    }

    #[tokio::test]
    async fn load_or_init_is_idempotent() {
        let db = db().await;
        let first = load_or_init(&db).await.unwrap();
        let second = load_or_init(&db).await.unwrap();
        assert_eq!(first.id, SINGLETON_ID);
        assert_eq!(second.id, SINGLETON_ID);
        assert!(!second.is_running);
    }

    #[tokio::test]
    async fn batch_lifecycle_updates_counters() {
        let db = db().await;
        load_or_init(&db).await.unwrap();
        let batch_id = Uuid::new_v4();
        let now = Utc::now();

        assert!(mark_batch_started(&db, batch_id, now).await.unwrap());
        assert!(
            !mark_batch_started(&db, Uuid::new_v4(), now).await.unwrap(),
            "second start is refused while running"
        );

        let counters = BatchCounters {
            processed: 3,
            successful: 2,
            failed: 1,
            deferred: 0,
        };
        let next = now + chrono::Duration::minutes(60);
        mark_batch_finished(&db, batch_id, counters, Some(next), Some("boom".into()), now)
            .await
            .unwrap();
        let second_batch = Uuid::new_v4();
        assert!(mark_batch_started(&db, second_batch, now).await.unwrap());
        assert!(
            mark_batch_finished(&db, second_batch, counters, Some(next), None, now)
                .await
                .unwrap()
        );

        let state = load_or_init(&db).await.unwrap();
        assert!(!state.is_running);
        assert_eq!(state.total_repos_processed, 6);
        assert_eq!(state.successful_syncs, 4);
        assert_eq!(state.failed_syncs, 2);
        assert_eq!(state.last_batch_id, Some(second_batch));
        assert_eq!(state.last_error, None);
        assert!(state.next_run_at.is_some());
    }

    #[tokio::test]
    async fn finishing_a_superseded_batch_keeps_the_live_flag() {
        let db = db().await;
        load_or_init(&db).await.unwrap();
        let now = Utc::now();

        // The first batch's flag is reset as stale and a second batch starts
        // before the first one reports back.
        let stale = Uuid::new_v4();
        let live = Uuid::new_v4();
        assert!(mark_batch_started(&db, stale, now).await.unwrap());
        assert!(reset_stale_running(&db).await.unwrap());
        assert!(mark_batch_started(&db, live, now).await.unwrap());

        let counters = BatchCounters {
            processed: 2,
            successful: 2,
            ..BatchCounters::default()
        };
        assert!(
            !mark_batch_finished(&db, stale, counters, None, None, now)
                .await
                .unwrap()
        );

        let state = load_or_init(&db).await.unwrap();
        assert!(state.is_running, "live batch still owns the flag");
        assert_eq!(state.current_batch_id, Some(live));
        assert_eq!(state.total_repos_processed, 2, "counters still count");

        assert!(
            mark_batch_finished(&db, live, BatchCounters::default(), None, None, now)
                .await
                .unwrap()
        );
        assert!(!load_or_init(&db).await.unwrap().is_running);
    }

    #[tokio::test]
    async fn stale_running_flag_is_reset() {
        let db = db().await;
        load_or_init(&db).await.unwrap();
        mark_batch_started(&db, Uuid::new_v4(), Utc::now()).await.unwrap();

        assert!(reset_stale_running(&db).await.unwrap());
        assert!(!reset_stale_running(&db).await.unwrap());
        assert!(!load_or_init(&db).await.unwrap().is_running);
    }

    #[tokio::test]
    async fn config_round_trips_through_the_state_row() {
        let db = db().await;
        assert_eq!(load_config(&db).await.unwrap(), None);

        let config = SchedulerConfig {
            interval_minutes: 15,
            ..SchedulerConfig::default()
        };
        save_config(&db, &config).await.unwrap();
        assert_eq!(load_config(&db).await.unwrap(), Some(config));
    }
}
