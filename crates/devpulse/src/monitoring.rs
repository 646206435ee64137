//! Read-only health and sync metrics.

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::Serialize;
use uuid::Uuid;

use crate::db;
use crate::entity::prelude::*;
use crate::platform::{RateLimitStatus, TokenBucket};
use crate::scheduler::state;
use crate::sync::jobs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    /// Working, but the last batch reported failures or the API budget is exhausted.
    Degraded,
    /// The database is unreachable.
    Unhealthy,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthState,
    pub database_ok: bool,
    pub database_error: Option<String>,
    pub scheduler_running: Option<bool>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub rate_limit: RateLimitStatus,
    pub checked_at: DateTime<Utc>,
}

pub async fn health_check(db: &DatabaseConnection, limiter: &TokenBucket) -> HealthReport {
    let rate_limit = limiter.status();
    let checked_at = Utc::now();

    if let Err(e) = db::ping(db).await {
        tracing::warn!(error = %e, "Health check: database unreachable");
        return HealthReport {
            status: HealthState::Unhealthy,
            database_ok: false,
            database_error: Some(e.to_string()),
            scheduler_running: None,
            last_run_at: None,
            next_run_at: None,
            last_error: None,
            rate_limit,
            checked_at,
        };
    }

    let scheduler = match state::load_or_init(db).await {
        Ok(state) => Some(state),
        Err(e) => {
            tracing::warn!(error = %e, "Health check: scheduler state unavailable");
            None
        }
    };

    let last_error = scheduler.as_ref().and_then(|s| s.last_error.clone());
    let status = if scheduler.is_none() || last_error.is_some() || rate_limit.remaining == 0 {
        HealthState::Degraded
    } else {
        HealthState::Healthy
    };

    HealthReport {
        status,
        database_ok: true,
        database_error: None,
        scheduler_running: scheduler.as_ref().map(|s| s.is_running),
        last_run_at: scheduler
            .as_ref()
            .and_then(|s| s.last_run_at)
            .map(|at| at.with_timezone(&Utc)),
        next_run_at: scheduler
            .as_ref()
            .and_then(|s| s.next_run_at)
            .map(|at| at.with_timezone(&Utc)),
        last_error,
        rate_limit,
        checked_at,
    }
}

/// Aggregates over jobs created since a point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncMetrics {
    pub since: Option<DateTime<Utc>>,
    pub total_jobs: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub running: u64,
    pub records_processed: i64,
    /// Mean duration of finished jobs.
    pub average_duration_seconds: Option<f64>,
    /// Completed share of finished jobs.
    pub success_rate: Option<f64>,
}

impl SyncMetrics {
    fn from_jobs(since: DateTime<Utc>, jobs: &[SyncJobModel]) -> Self {
        let mut metrics = SyncMetrics {
            since: Some(since),
            total_jobs: jobs.len() as u64,
            ..SyncMetrics::default()
        };

        let mut durations = Vec::new();
        for job in jobs {
            match job.status {
                JobStatus::Completed => metrics.completed += 1,
                JobStatus::Failed => metrics.failed += 1,
                JobStatus::Cancelled => metrics.cancelled += 1,
                JobStatus::Running | JobStatus::Pending => metrics.running += 1,
            }
            metrics.records_processed += job.records_processed;
            if job.status.is_terminal()
                && let Some(duration) = job.duration()
            {
                durations.push(duration.num_milliseconds() as f64 / 1000.0);
            }
        }

        if !durations.is_empty() {
            metrics.average_duration_seconds =
                Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        let finished = metrics.completed + metrics.failed + metrics.cancelled;
        if finished > 0 {
            metrics.success_rate = Some(metrics.completed as f64 / finished as f64);
        }
        metrics
    }
}

pub async fn sync_metrics(db: &DatabaseConnection, since: DateTime<Utc>) -> Result<SyncMetrics, DbErr> {
    let jobs = SyncJob::find()
        .filter(SyncJobColumn::CreatedAt.gte(since.fixed_offset()))
        .all(db)
        .await?;
    Ok(SyncMetrics::from_jobs(since, &jobs))
}

#[derive(Debug, Clone, Serialize)]
pub struct RepositoryStats {
    pub repository_id: Uuid,
    pub full_name: String,
    pub enabled: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_job_status: Option<JobStatus>,
    pub pull_requests: u64,
    pub commits: u64,
    pub failed_jobs: u64,
}

/// Per-repository activity counts, in registration order.
pub async fn repository_stats(db: &DatabaseConnection) -> Result<Vec<RepositoryStats>, DbErr> {
    let repositories = TrackedRepository::find()
        .order_by_asc(TrackedRepositoryColumn::CreatedAt)
        .all(db)
        .await?;

    let mut stats = Vec::with_capacity(repositories.len());
    for repo in repositories {
        let pull_requests = PullRequest::find()
            .filter(PullRequestColumn::RepositoryId.eq(repo.id))
            .count(db)
            .await?;
        let commits = Commit::find()
            .filter(CommitColumn::RepositoryId.eq(repo.id))
            .count(db)
            .await?;
        let failed_jobs = SyncJob::find()
            .filter(SyncJobColumn::RepositoryId.eq(repo.id))
            .filter(SyncJobColumn::Status.eq(JobStatus::Failed))
            .count(db)
            .await?;
        let last_job_status = jobs::latest(db, repo.id).await?.map(|job| job.status);

        stats.push(RepositoryStats {
            repository_id: repo.id,
            full_name: repo.full_name(),
            enabled: repo.enabled,
            last_sync_at: repo.last_sync_at.map(|at| at.with_timezone(&Utc)),
            last_job_status,
            pull_requests,
            commits,
            failed_jobs,
        });
    }
    Ok(stats)
}

/// Most recent failed jobs, newest first.
pub async fn recent_failures(db: &DatabaseConnection, limit: u64) -> Result<Vec<SyncJobModel>, DbErr> {
    SyncJob::find()
        .filter(SyncJobColumn::Status.eq(JobStatus::Failed))
        .order_by_desc(SyncJobColumn::CreatedAt)
        .limit(limit)
        .all(db)
        .await
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn job(status: JobStatus, records: i64, seconds: Option<i64>) -> SyncJobModel {
        let started = Utc::now().fixed_offset();
        SyncJobModel {
            id: Uuid::new_v4(),
            repository_id: Uuid::new_v4(),
            batch_id: None,
            status,
            sync_type: SyncType::Incremental,
            started_at: Some(started),
            completed_at: seconds.map(|s| started + Duration::seconds(s)),
            error: None,
            records_processed: records,
            cancel_requested: false,
            created_at: started,
        }
    }

    #[test]
    fn metrics_aggregate_jobs() {
        let since = Utc::now() - Duration::hours(24);
        let jobs = vec![
            job(JobStatus::Completed, 10, Some(4)),
            job(JobStatus::Completed, 5, Some(2)),
            job(JobStatus::Failed, 0, Some(6)),
            job(JobStatus::Running, 3, None),
        ];

        let metrics = SyncMetrics::from_jobs(since, &jobs);
        assert_eq!(metrics.total_jobs, 4);
        assert_eq!(metrics.completed, 2);
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.running, 1);
        assert_eq!(metrics.records_processed, 18);
        assert_eq!(metrics.average_duration_seconds, Some(4.0));
        let rate = metrics.success_rate.unwrap();
        assert!((rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn metrics_without_finished_jobs_have_no_rates() {
        let metrics = SyncMetrics::from_jobs(Utc::now(), &[job(JobStatus::Running, 0, None)]);
        assert_eq!(metrics.average_duration_seconds, None);
        assert_eq!(metrics.success_rate, None);
    }

    #[cfg(all(feature = "sqlite", feature = "migrate"))]
    #[tokio::test]
    async fn health_of_fresh_database() {
        let db = crate::db::connect_and_migrate("sqlite::memory:")
            .await
            .expect("test db should migrate");
        let limiter = TokenBucket::new(60, 10);

        let report = health_check(&db, &limiter).await;
        assert_eq!(report.status, HealthState::Healthy);
        assert!(report.database_ok);
        assert_eq!(report.scheduler_running, Some(false));

        assert!(repository_stats(&db).await.unwrap().is_empty());
        assert!(recent_failures(&db, 5).await.unwrap().is_empty());
        assert_eq!(
            sync_metrics(&db, Utc::now() - Duration::hours(1)).await.unwrap().total_jobs,
            0
        );
    }
}
