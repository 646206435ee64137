//! Periodic sync batches.
//!
//! # Module Structure
//!
//! - [`config`] - `SchedulerConfig`: runtime-editable tunables
//! - [`state`] - persistence of the singleton `scheduler_state` row
//!
//! A batch lists the enabled repositories, syncs them in groups of at most
//! `max_concurrent_repos` (pausing `delay_between_repos_seconds` between two
//! dispatches), records the outcome in `scheduler_state` and hands the
//! aggregate to the notification service. One scheduler instance never runs
//! two batches at the same time: a tick that finds a batch running is skipped.

mod config;
pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DbErr};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::entity::job_status::SyncType;
use crate::notification::NotificationService;
use crate::platform::RateLimitStatus;
use crate::repository::{self, RepositoryError};
use crate::sync::{ProgressCallback, SyncOrchestrator, SyncOutcome, SyncProgress, SyncResult, emit};

pub use config::SchedulerConfig;
pub use state::BatchCounters;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("A sync batch is already running")]
    AlreadyRunning,

    #[error("Invalid scheduler configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Outcome of one batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub deferred: usize,
    pub cancelled: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// `repository_id: error` of every failed sync.
    pub errors: Vec<String>,
}

impl BatchSummary {
    fn new(batch_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            batch_id,
            total: 0,
            successful: 0,
            failed: 0,
            deferred: 0,
            cancelled: 0,
            started_at,
            finished_at: None,
            errors: Vec::new(),
        }
    }

    fn record(&mut self, result: &SyncResult) {
        self.total += 1;
        match result.outcome {
            SyncOutcome::Completed => self.successful += 1,
            SyncOutcome::Deferred => self.deferred += 1,
            SyncOutcome::Cancelled => self.cancelled += 1,
            SyncOutcome::Failed => {
                self.failed += 1;
                self.errors.push(format!(
                    "{}: {}",
                    result.repository_id,
                    result.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }
    }

    fn record_panic(&mut self, message: String) {
        self.total += 1;
        self.failed += 1;
        self.errors.push(message);
    }

    fn counters(&self) -> BatchCounters {
        BatchCounters {
            processed: self.total as i64,
            successful: self.successful as i64,
            failed: self.failed as i64,
            deferred: self.deferred as i64,
        }
    }

    fn last_error(&self) -> Option<String> {
        self.errors.last().cloned()
    }
}

/// Snapshot returned by [`SyncScheduler::get_status`].
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    /// The periodic timer is active.
    pub timer_active: bool,
    /// A batch is executing in this process.
    pub batch_running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub current_batch_id: Option<Uuid>,
    pub last_batch_id: Option<Uuid>,
    pub total_repos_processed: i64,
    pub successful_syncs: i64,
    pub failed_syncs: i64,
    pub deferred_syncs: i64,
    pub last_error: Option<String>,
    pub rate_limit: RateLimitStatus,
}

struct Timer {
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

/// Clears the in-process running flag when the batch ends, on every path.
struct BatchGuard<'a>(&'a AtomicBool);

impl<'a> BatchGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The process-wide scheduler. Share it behind an `Arc`.
pub struct SyncScheduler {
    db: Arc<DatabaseConnection>,
    orchestrator: SyncOrchestrator,
    notifications: NotificationService,
    config: RwLock<SchedulerConfig>,
    batch_running: AtomicBool,
    timer: Mutex<Option<Timer>>,
    progress: Option<Arc<ProgressCallback>>,
}

impl SyncScheduler {
    /// Build the scheduler from persisted state.
    ///
    /// A configuration saved by [`update_config`](Self::update_config) takes
    /// precedence over `fallback`. A stale running flag left by a crashed
    /// process is cleared.
    pub async fn load(
        db: Arc<DatabaseConnection>,
        orchestrator: SyncOrchestrator,
        notifications: NotificationService,
        fallback: SchedulerConfig,
        progress: Option<Arc<ProgressCallback>>,
    ) -> Result<Arc<Self>> {
        state::load_or_init(db.as_ref()).await?;
        if state::reset_stale_running(db.as_ref()).await? {
            tracing::warn!("Cleared running flag left by an interrupted batch");
        }

        let config = match state::load_config(db.as_ref()).await? {
            Some(stored) => stored,
            None => fallback,
        };
        config.validate()?;

        let scheduler = Arc::new(Self {
            db,
            orchestrator,
            notifications,
            config: RwLock::new(config.clone()),
            batch_running: AtomicBool::new(false),
            timer: Mutex::new(None),
            progress,
        });
        scheduler.apply_runtime_config(&config);
        Ok(scheduler)
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    pub fn get_config(&self) -> SchedulerConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Validate, persist and apply a new configuration.
    ///
    /// The shared rate limiter and the orchestrator options change in place.
    /// A running timer is restarted when the interval changed.
    pub async fn update_config(self: &Arc<Self>, config: SchedulerConfig) -> Result<SchedulerConfig> {
        config.validate()?;
        state::save_config(self.db.as_ref(), &config).await?;

        let previous = {
            let mut current = self.config.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *current, config.clone())
        };
        self.apply_runtime_config(&config);
        tracing::info!(
            interval_minutes = config.interval_minutes,
            max_concurrent_repos = config.max_concurrent_repos,
            rate_limit_per_minute = config.azure_rate_limit_per_minute,
            "Scheduler configuration updated"
        );

        if previous.interval_minutes != config.interval_minutes && self.is_timer_active() {
            self.stop().await?;
            self.start().await?;
        }
        Ok(config)
    }

    fn apply_runtime_config(&self, config: &SchedulerConfig) {
        self.orchestrator
            .limiter()
            .reconfigure(config.azure_rate_limit_per_minute, config.azure_burst_limit);
        self.orchestrator.update_options(config.orchestrator_options());
    }

    pub fn is_timer_active(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn is_batch_running(&self) -> bool {
        self.batch_running.load(Ordering::SeqCst)
    }

    /// Start the periodic timer. The first batch runs one interval from now.
    ///
    /// Returns `false` when the timer was already running.
    pub async fn start(self: &Arc<Self>) -> Result<bool> {
        let interval = self.get_config().interval();
        {
            let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
            if timer.is_some() {
                return Ok(false);
            }

            let stop = Arc::new(Notify::new());
            let task = tokio::spawn(run_timer(Arc::downgrade(self), interval, Arc::clone(&stop)));
            *timer = Some(Timer { stop, task });
        }

        let next_run_at = after(Utc::now(), interval);
        state::set_next_run_at(self.db.as_ref(), Some(next_run_at)).await?;
        tracing::info!(interval_secs = interval.as_secs(), next_run_at = %next_run_at, "Scheduler started");
        Ok(true)
    }

    /// Stop the periodic timer. A batch already executing runs to completion.
    ///
    /// Returns `false` when the timer was not running.
    pub async fn stop(&self) -> Result<bool> {
        let timer = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(timer) = timer else {
            return Ok(false);
        };

        timer.stop.notify_one();
        if let Err(e) = timer.task.await
            && e.is_panic()
        {
            tracing::error!(error = %e, "Scheduler timer panicked");
        }

        state::set_next_run_at(self.db.as_ref(), None).await?;
        tracing::info!("Scheduler stopped");
        Ok(true)
    }

    /// Stop the timer and wait up to `grace` for a running batch to finish.
    ///
    /// Returns `true` when no batch was left running.
    pub async fn shutdown(&self, grace: Duration) -> Result<bool> {
        self.stop().await?;

        let deadline = Instant::now() + grace;
        while self.is_batch_running() {
            if Instant::now() >= deadline {
                tracing::warn!("Shutdown grace period elapsed with a batch still running");
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(true)
    }

    /// Run one batch immediately.
    ///
    /// # Errors
    /// [`SchedulerError::AlreadyRunning`] if a batch is executing.
    pub async fn run_now(&self) -> Result<BatchSummary> {
        self.run_batch().await
    }

    /// One timer tick: run a batch unless one is still executing.
    async fn tick(&self) {
        match self.run_batch().await {
            Ok(summary) => {
                tracing::info!(
                    batch_id = %summary.batch_id,
                    total = summary.total,
                    failed = summary.failed,
                    "Scheduled batch finished"
                );
            }
            Err(SchedulerError::AlreadyRunning) => {
                tracing::info!("Previous batch still running, skipping tick");
                emit(self.progress.as_deref(), SyncProgress::TickSkipped);
            }
            Err(e) => {
                tracing::error!(error = %e, "Scheduled batch failed");
            }
        }
    }

    async fn run_batch(&self) -> Result<BatchSummary> {
        let Some(_guard) = BatchGuard::acquire(&self.batch_running) else {
            return Err(SchedulerError::AlreadyRunning);
        };

        let config = self.get_config();
        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();

        if !state::mark_batch_started(self.db.as_ref(), batch_id, started_at).await? {
            // Repository leases still keep the syncs themselves exclusive.
            tracing::warn!(%batch_id, "Scheduler state already marks a batch as running");
        }

        let mut summary = BatchSummary::new(batch_id, started_at);
        let executed = self.execute_batch(&config, &mut summary).await;

        let finished_at = Utc::now();
        summary.finished_at = Some(finished_at);
        let last_error = match &executed {
            Ok(()) => summary.last_error(),
            Err(e) => Some(e.to_string()),
        };
        let next_run_at = self
            .is_timer_active()
            .then(|| after(finished_at, config.interval()));

        let cleared = state::mark_batch_finished(
            self.db.as_ref(),
            batch_id,
            summary.counters(),
            next_run_at,
            last_error,
            finished_at,
        )
        .await?;
        if !cleared {
            tracing::warn!(%batch_id, "Running flag was taken over by another batch, leaving it set");
        }
        executed?;

        emit(
            self.progress.as_deref(),
            SyncProgress::BatchCompleted {
                batch_id,
                successful: summary.successful,
                failed: summary.failed,
                deferred: summary.deferred,
            },
        );
        tracing::info!(
            %batch_id,
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            deferred = summary.deferred,
            cancelled = summary.cancelled,
            "Sync batch completed"
        );

        self.notify(&config, &summary).await;
        Ok(summary)
    }

    async fn execute_batch(&self, config: &SchedulerConfig, summary: &mut BatchSummary) -> Result<()> {
        let repositories = repository::list_enabled(self.db.as_ref()).await?;
        let batch_id = summary.batch_id;

        tracing::info!(%batch_id, repositories = repositories.len(), "Sync batch started");
        emit(
            self.progress.as_deref(),
            SyncProgress::BatchStarted {
                batch_id,
                repositories: repositories.len(),
            },
        );

        let group_size = config.max_concurrent_repos.max(1) as usize;
        let delay = config.delay_between_repos();
        let mut dispatched = 0usize;

        for group in repositories.chunks(group_size) {
            let mut set = JoinSet::new();
            for repo in group {
                if dispatched > 0 && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                dispatched += 1;

                let sync_type = if repo.last_sync_at.is_none() {
                    SyncType::Full
                } else {
                    SyncType::Incremental
                };
                let orchestrator = self.orchestrator.clone();
                let repository_id = repo.id;
                set.spawn(async move {
                    orchestrator
                        .sync_repository_in_batch(repository_id, sync_type, Some(batch_id))
                        .await
                });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(result) => summary.record(&result),
                    Err(e) => {
                        tracing::error!(%batch_id, error = %e, "Repository sync task panicked");
                        summary.record_panic(format!("sync task panicked: {e}"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Hand the batch outcome to the notification service.
    ///
    /// Notification problems are logged; they never fail the batch.
    async fn notify(&self, config: &SchedulerConfig, summary: &BatchSummary) {
        if !config.notification_enabled || summary.total == 0 {
            return;
        }
        let recipients = config.recipients();

        let sent = if summary.failed > 0 {
            if summary.failed < config.failure_notification_threshold.max(1) as usize {
                return;
            }
            self.notifications
                .send_failure_notification(summary.batch_id, summary.failed, summary.total, &recipients)
                .await
        } else {
            self.notifications
                .send_success_notification(summary.batch_id, summary.total, &recipients)
                .await
        };

        if let Err(e) = sent {
            tracing::warn!(batch_id = %summary.batch_id, error = %e, "Failed to send batch notification");
        }
    }

    pub async fn get_status(&self) -> Result<SchedulerStatus> {
        let state = state::load_or_init(self.db.as_ref()).await?;
        let utc = |at: sea_orm::prelude::DateTimeWithTimeZone| at.with_timezone(&Utc);

        Ok(SchedulerStatus {
            timer_active: self.is_timer_active(),
            batch_running: self.is_batch_running(),
            last_run_at: state.last_run_at.map(utc),
            next_run_at: state.next_run_at.map(utc),
            current_batch_id: state.current_batch_id,
            last_batch_id: state.last_batch_id,
            total_repos_processed: state.total_repos_processed,
            successful_syncs: state.successful_syncs,
            failed_syncs: state.failed_syncs,
            deferred_syncs: state.deferred_syncs,
            last_error: state.last_error,
            rate_limit: self.orchestrator.limiter().status(),
        })
    }
}

fn after(at: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    at + chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::zero())
}

async fn run_timer(scheduler: std::sync::Weak<SyncScheduler>, interval: Duration, stop: Arc<Notify>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop.notified() => break,
            _ = ticker.tick() => {
                let Some(scheduler) = scheduler.upgrade() else { break };
                let next_run_at = after(Utc::now(), interval);
                if let Err(e) = state::set_next_run_at(scheduler.db.as_ref(), Some(next_run_at)).await {
                    tracing::warn!(error = %e, "Failed to persist next run time");
                }
                // The tick runs detached so a long batch never delays the timer.
                tokio::spawn(async move { scheduler.tick().await });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use super::*;

    fn result(outcome: SyncOutcome, error: Option<&str>) -> SyncResult {
        SyncResult {
            repository_id: Uuid::new_v4(),
            job_id: None,
            outcome,
            has_new_data: false,
            records_processed: 0,
            duration: StdDuration::ZERO,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn summary_counts_outcomes() {
        let mut summary = BatchSummary::new(Uuid::new_v4(), Utc::now());
        summary.record(&result(SyncOutcome::Completed, None));
        summary.record(&result(SyncOutcome::Completed, None));
        summary.record(&result(SyncOutcome::Deferred, Some("sync already in progress")));
        summary.record(&result(SyncOutcome::Failed, Some("HTTP 500")));
        summary.record(&result(SyncOutcome::Cancelled, None));
        summary.record_panic("sync task panicked".into());

        assert_eq!(summary.total, 6);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.failed, 2);
        assert!(summary.errors[0].ends_with("HTTP 500"));
        assert_eq!(summary.last_error().as_deref(), Some("sync task panicked"));

        let counters = summary.counters();
        assert_eq!(counters.processed, 6);
        assert_eq!(counters.failed, 2);
    }

    #[test]
    fn batch_guard_is_exclusive_and_released() {
        let flag = AtomicBool::new(false);
        {
            let _guard = BatchGuard::acquire(&flag).expect("free flag is acquired");
            assert!(BatchGuard::acquire(&flag).is_none());
        }
        assert!(!flag.load(Ordering::SeqCst));
        assert!(BatchGuard::acquire(&flag).is_some());
    }

    #[test]
    fn already_running_message() {
        assert_eq!(
            SchedulerError::AlreadyRunning.to_string(),
            "A sync batch is already running"
        );
    }
}
