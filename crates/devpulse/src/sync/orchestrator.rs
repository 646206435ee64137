//! Per-repository sync jobs.
//!
//! One invocation of [`SyncOrchestrator::sync_repository`]:
//!
//! 1. takes the repository's lease (or returns a deferral),
//! 2. inserts a `running` job stamped with its start time,
//! 3. walks pull request pages (with their reviews and comments) and then
//!    commit pages, one page at a time through the rate limiter, handing each
//!    page to the reconciler as soon as it arrives. Incremental windows walk
//!    pull requests twice: created in the window, then closed in it,
//! 4. finalizes the job and, when it completed with data, advances the
//!    repository's `last_sync_at` to the job's start time,
//! 5. releases the lease on every path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use tokio::time::Instant;
use uuid::Uuid;

use crate::entity::job_status::{JobStatus, SyncType};
use crate::entity::tracked_repository::Model as TrackedRepositoryModel;
use crate::platform::{
    ActivityBatch, ActivityKind, ActivityPage, ActivitySource, CredentialProvider, PageCursor,
    PageRequest, PlatformError, PullRequestTimeRange, RepositoryCoordinates, SyncWindow,
    TokenBucket, short_error_message,
};
use crate::reconcile::{BatchOutcome, ReconcileScope, Reconciler};
use crate::repository;
use crate::retry::{RetryPolicy, with_retry};

use super::errors::{Result, SyncError};
use super::jobs;
use super::lease::{Lease, LeaseStore};
use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::{OrchestratorOptions, SyncOutcome, SyncResult, SyncStatus};

/// Runs repository syncs. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    db: Arc<DatabaseConnection>,
    source: Arc<dyn ActivitySource>,
    limiter: Arc<TokenBucket>,
    leases: Arc<dyn LeaseStore>,
    credentials: Arc<dyn CredentialProvider>,
    reconciler: Reconciler,
    options: RwLock<OrchestratorOptions>,
    /// Prefix of every lease holder token issued by this process.
    instance_id: String,
    /// Cancellation flags of jobs running in this process, by repository.
    cancellations: Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
    progress: Option<Arc<ProgressCallback>>,
}

impl SyncOrchestrator {
    pub fn new(
        db: Arc<DatabaseConnection>,
        source: Arc<dyn ActivitySource>,
        limiter: Arc<TokenBucket>,
        leases: Arc<dyn LeaseStore>,
        credentials: Arc<dyn CredentialProvider>,
        options: OrchestratorOptions,
    ) -> Self {
        Self::build(db, source, limiter, leases, credentials, options, None)
    }

    /// Same as [`new`](Self::new), reporting progress through `callback`.
    pub fn with_progress(
        db: Arc<DatabaseConnection>,
        source: Arc<dyn ActivitySource>,
        limiter: Arc<TokenBucket>,
        leases: Arc<dyn LeaseStore>,
        credentials: Arc<dyn CredentialProvider>,
        options: OrchestratorOptions,
        callback: Arc<ProgressCallback>,
    ) -> Self {
        Self::build(db, source, limiter, leases, credentials, options, Some(callback))
    }

    fn build(
        db: Arc<DatabaseConnection>,
        source: Arc<dyn ActivitySource>,
        limiter: Arc<TokenBucket>,
        leases: Arc<dyn LeaseStore>,
        credentials: Arc<dyn CredentialProvider>,
        options: OrchestratorOptions,
        progress: Option<Arc<ProgressCallback>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                reconciler: Reconciler::new(Arc::clone(&db)),
                db,
                source,
                limiter,
                leases,
                credentials,
                options: RwLock::new(options),
                instance_id: format!("devpulse-{}", Uuid::new_v4()),
                cancellations: Mutex::new(HashMap::new()),
                progress,
            }),
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.inner.reconciler
    }

    pub fn limiter(&self) -> &Arc<TokenBucket> {
        &self.inner.limiter
    }

    pub fn options(&self) -> OrchestratorOptions {
        self.inner
            .options
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the options used by jobs started from now on.
    pub fn update_options(&self, options: OrchestratorOptions) {
        *self
            .inner
            .options
            .write()
            .unwrap_or_else(|e| e.into_inner()) = options;
    }

    /// Replace only the retry policy.
    pub fn set_retry_policy(&self, retry: RetryPolicy) {
        self.inner
            .options
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retry = retry;
    }

    /// Sync one repository.
    ///
    /// Never returns an error: failures are recorded on the job and reported
    /// in the [`SyncResult`].
    pub async fn sync_repository(&self, repository_id: Uuid, sync_type: SyncType) -> SyncResult {
        self.sync_repository_in_batch(repository_id, sync_type, None)
            .await
    }

    /// Sync one repository on behalf of a scheduler batch.
    pub async fn sync_repository_in_batch(
        &self,
        repository_id: Uuid,
        sync_type: SyncType,
        batch_id: Option<Uuid>,
    ) -> SyncResult {
        let started = Instant::now();
        let options = self.options();
        let key = repository_id.to_string();
        let holder = format!("{}:{}", self.inner.instance_id, Uuid::new_v4());

        let lease = match self
            .inner
            .leases
            .acquire(&key, &holder, options.lease_ttl, Utc::now())
            .await
        {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                tracing::info!(repository_id = %repository_id, "Sync already in progress, deferring");
                self.emit(SyncProgress::Deferred { repository_id });
                return SyncResult::deferred(repository_id, started.elapsed());
            }
            Err(e) => {
                tracing::error!(repository_id = %repository_id, error = %e, "Failed to acquire sync lease");
                self.emit(SyncProgress::JobFailed {
                    repository_id,
                    job_id: None,
                    error: e.to_string(),
                });
                return SyncResult::failed(repository_id, None, started.elapsed(), e.to_string());
            }
        };

        let result = self
            .run_leased(lease.clone(), repository_id, sync_type, batch_id, options, started)
            .await;

        match self.inner.leases.release(&lease).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(repository_id = %repository_id, "Lease expired before release");
            }
            Err(e) => {
                tracing::warn!(repository_id = %repository_id, error = %e, "Failed to release lease, it will expire");
            }
        }

        result
    }

    async fn run_leased(
        &self,
        lease: Lease,
        repository_id: Uuid,
        sync_type: SyncType,
        batch_id: Option<Uuid>,
        options: OrchestratorOptions,
        started: Instant,
    ) -> SyncResult {
        let db = self.inner.db.as_ref();

        let repo = match repository::get(db, repository_id).await {
            Ok(repo) => repo,
            Err(e) => {
                tracing::error!(repository_id = %repository_id, error = %e, "Cannot sync repository");
                self.emit(SyncProgress::JobFailed {
                    repository_id,
                    job_id: None,
                    error: e.to_string(),
                });
                return SyncResult::failed(repository_id, None, started.elapsed(), e.to_string());
            }
        };

        let started_at = Utc::now();
        let job = match jobs::create_running(db, repository_id, sync_type, batch_id, started_at).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(repository_id = %repository_id, error = %e, "Failed to create sync job");
                self.emit(SyncProgress::JobFailed {
                    repository_id,
                    job_id: None,
                    error: e.to_string(),
                });
                return SyncResult::failed(repository_id, None, started.elapsed(), e.to_string());
            }
        };

        tracing::info!(
            repository_id = %repository_id,
            repository = %repo.full_name(),
            job_id = %job.id,
            sync_type = %sync_type,
            "Sync started"
        );
        self.emit(SyncProgress::JobStarted {
            repository_id,
            job_id: job.id,
            sync_type,
        });

        let cancel = Arc::new(AtomicBool::new(false));
        self.inner
            .cancellations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(repository_id, Arc::clone(&cancel));

        let records = Arc::new(AtomicUsize::new(0));
        let run = JobRun {
            inner: Arc::clone(&self.inner),
            window: match sync_type {
                SyncType::Full => SyncWindow::full(started_at),
                SyncType::Incremental => SyncWindow::since(
                    repo.last_sync_at.map(|t| t.with_timezone(&Utc)),
                    started_at,
                ),
            },
            repo,
            job_id: job.id,
            lease: Mutex::new(lease),
            cancel,
            records: Arc::clone(&records),
            options,
        };

        // A panic inside the job surfaces as a JoinError instead of unwinding
        // past the lease release.
        let body = match tokio::spawn(run.execute()).await {
            Ok(body) => body,
            Err(join_err) => Err(SyncError::TaskPanicked(join_err.to_string())),
        };

        self.inner
            .cancellations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&repository_id);

        self.finalize(repository_id, job.id, started_at, started, records.load(Ordering::SeqCst), body)
            .await
    }

    async fn finalize(
        &self,
        repository_id: Uuid,
        job_id: Uuid,
        started_at: DateTime<Utc>,
        started: Instant,
        records_processed: usize,
        body: Result<()>,
    ) -> SyncResult {
        let db = self.inner.db.as_ref();

        let (status, outcome, error) = match &body {
            Ok(()) => (JobStatus::Completed, SyncOutcome::Completed, None),
            Err(SyncError::Cancelled) => (JobStatus::Cancelled, SyncOutcome::Cancelled, None),
            Err(e) => (
                JobStatus::Failed,
                SyncOutcome::Failed,
                Some(short_error_message(e)),
            ),
        };

        if let Err(e) = jobs::finish(db, job_id, status, records_processed, error.clone(), Utc::now()).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to finalize sync job");
        }

        // A zero-record run leaves the window open so the next incremental
        // run covers it again.
        if status == JobStatus::Completed
            && records_processed > 0
            && let Err(e) = repository::advance_last_sync_at(db, repository_id, started_at).await
        {
            tracing::error!(repository_id = %repository_id, error = %e, "Failed to advance last_sync_at");
        }

        let duration = started.elapsed();
        match outcome {
            SyncOutcome::Completed => {
                tracing::info!(
                    repository_id = %repository_id,
                    job_id = %job_id,
                    records_processed,
                    duration_ms = duration.as_millis() as u64,
                    "Sync completed"
                );
                self.emit(SyncProgress::JobCompleted {
                    repository_id,
                    job_id,
                    records_processed,
                    duration_ms: duration.as_millis() as u64,
                });
            }
            SyncOutcome::Cancelled => {
                tracing::info!(repository_id = %repository_id, job_id = %job_id, records_processed, "Sync cancelled");
                self.emit(SyncProgress::JobCancelled {
                    repository_id,
                    job_id,
                    records_processed,
                });
            }
            SyncOutcome::Failed | SyncOutcome::Deferred => {
                let message = error.clone().unwrap_or_default();
                tracing::error!(repository_id = %repository_id, job_id = %job_id, records_processed, error = %message, "Sync failed");
                self.emit(SyncProgress::JobFailed {
                    repository_id,
                    job_id: Some(job_id),
                    error: message,
                });
            }
        }

        SyncResult {
            repository_id,
            job_id: Some(job_id),
            outcome,
            has_new_data: records_processed > 0,
            records_processed,
            duration,
            error,
        }
    }

    /// Request cancellation of the running sync of a repository.
    ///
    /// Sets the in-process flag and the job's `cancel_requested` column, so a
    /// job running in another process observes it too. Returns whether a
    /// running job was found.
    pub async fn cancel_sync(&self, repository_id: Uuid) -> Result<bool> {
        let local = match self
            .inner
            .cancellations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&repository_id)
        {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        };

        let flagged = jobs::request_cancel(self.inner.db.as_ref(), repository_id).await?;
        let found = local || flagged > 0;
        if found {
            tracing::info!(repository_id = %repository_id, "Cancellation requested");
        }
        Ok(found)
    }

    pub async fn get_sync_status(&self, repository_id: Uuid) -> Result<SyncStatus> {
        let db = self.inner.db.as_ref();
        repository::get(db, repository_id).await?;

        let latest_job = jobs::latest(db, repository_id).await?;
        let is_running = self
            .inner
            .leases
            .current(&repository_id.to_string(), Utc::now())
            .await?
            .is_some();

        Ok(SyncStatus {
            repository_id,
            latest_job,
            is_running,
        })
    }

    pub async fn get_sync_history(
        &self,
        repository_id: Uuid,
        limit: u64,
    ) -> Result<Vec<crate::entity::sync_job::Model>> {
        Ok(jobs::history(self.inner.db.as_ref(), repository_id, limit).await?)
    }

    /// Fail jobs left `running` by a crashed process.
    ///
    /// Only jobs older than the lease TTL are touched; younger ones may still
    /// belong to a live process.
    pub async fn recover_interrupted_jobs(&self) -> Result<u64> {
        let now = Utc::now();
        let ttl = self.options().lease_ttl;
        let recovered = jobs::recover_interrupted(self.inner.db.as_ref(), now - ttl, now).await?;
        if recovered > 0 {
            tracing::warn!(count = recovered, "Marked interrupted sync jobs as failed");
        }
        Ok(recovered)
    }

    fn emit(&self, event: SyncProgress) {
        emit(self.inner.progress.as_deref(), event);
    }
}

/// State of one running job, moved into its task.
struct JobRun {
    inner: Arc<Inner>,
    repo: TrackedRepositoryModel,
    job_id: Uuid,
    window: SyncWindow,
    /// Replaced on every renewal. Only the job's own task touches it.
    lease: Mutex<Lease>,
    cancel: Arc<AtomicBool>,
    records: Arc<AtomicUsize>,
    options: OrchestratorOptions,
}

impl JobRun {
    async fn execute(mut self) -> Result<()> {
        let credential = self.inner.credentials.credential_for(&self.repo)?;
        let coordinates = RepositoryCoordinates::from_model(&self.repo, credential);

        self.sync_pull_requests(&coordinates).await?;
        self.sync_commits(&coordinates).await?;
        Ok(())
    }

    async fn sync_pull_requests(&mut self, coordinates: &RepositoryCoordinates) -> Result<()> {
        let ranges: &[PullRequestTimeRange] = if self.window.from.is_some() {
            &[PullRequestTimeRange::Created, PullRequestTimeRange::Closed]
        } else {
            &[PullRequestTimeRange::Created]
        };

        for &range in ranges {
            self.sync_pull_request_range(coordinates, range).await?;
        }
        Ok(())
    }

    async fn sync_pull_request_range(
        &mut self,
        coordinates: &RepositoryCoordinates,
        range: PullRequestTimeRange,
    ) -> Result<()> {
        let scope = ReconcileScope::Repository(self.repo.id);
        let window = self.window;
        let mut cursor = Some(PageCursor::first(self.options.page_size));

        while let Some(current) = cursor {
            let mut page = self
                .next_page(coordinates, ActivityKind::PullRequests, current, range, None)
                .await?;
            // The created pass already covered pull requests opened in the window.
            if range == PullRequestTimeRange::Closed
                && let ActivityBatch::PullRequests(items) = &mut page.batch
            {
                items.retain(|pr| !window.contains(pr.created_at));
            }

            let outcome = self.inner.reconciler.reconcile_batch(scope, &page.batch).await;
            self.record_page(ActivityKind::PullRequests, current, &outcome);

            for (pull_request_id, external_id) in &outcome.pull_requests {
                self.sync_pull_request_children(coordinates, *pull_request_id, external_id)
                    .await?;
            }

            self.persist_progress().await;
            cursor = page.next;
        }

        Ok(())
    }

    async fn sync_pull_request_children(
        &mut self,
        coordinates: &RepositoryCoordinates,
        pull_request_id: Uuid,
        external_id: &str,
    ) -> Result<()> {
        let scope = ReconcileScope::PullRequest(pull_request_id);

        for kind in [ActivityKind::Reviews, ActivityKind::Comments] {
            let mut cursor = Some(PageCursor::first(self.options.page_size));
            while let Some(current) = cursor {
                let page = self
                    .next_page(
                        coordinates,
                        kind,
                        current,
                        PullRequestTimeRange::Created,
                        Some(external_id),
                    )
                    .await?;
                let outcome = self.inner.reconciler.reconcile_batch(scope, &page.batch).await;
                self.record_page(kind, current, &outcome);
                cursor = page.next;
            }
        }

        if let Err(e) = self
            .inner
            .reconciler
            .refresh_review_metrics(pull_request_id)
            .await
        {
            tracing::warn!(pull_request_id = %pull_request_id, error = %e, "Failed to refresh review metrics");
        }
        Ok(())
    }

    async fn sync_commits(&mut self, coordinates: &RepositoryCoordinates) -> Result<()> {
        let scope = ReconcileScope::Repository(self.repo.id);
        let mut cursor = Some(PageCursor::first(self.options.page_size));

        while let Some(current) = cursor {
            let page = self
                .next_page(
                    coordinates,
                    ActivityKind::Commits,
                    current,
                    PullRequestTimeRange::Created,
                    None,
                )
                .await?;
            let outcome = self.inner.reconciler.reconcile_batch(scope, &page.batch).await;
            self.record_page(ActivityKind::Commits, current, &outcome);
            self.persist_progress().await;
            cursor = page.next;
        }

        Ok(())
    }

    /// Check for cancellation, then fetch one page with retries.
    async fn next_page(
        &mut self,
        coordinates: &RepositoryCoordinates,
        kind: ActivityKind,
        cursor: PageCursor,
        time_range: PullRequestTimeRange,
        pull_request: Option<&str>,
    ) -> Result<ActivityPage> {
        self.checkpoint().await?;

        let request = PageRequest {
            repository: coordinates.clone(),
            kind,
            window: self.window,
            cursor,
            time_range,
            pull_request: pull_request.map(str::to_string),
        };
        let label = match (kind, time_range) {
            (ActivityKind::PullRequests, PullRequestTimeRange::Closed) => format!(
                "{} closed {} page {}",
                coordinates.display_name(),
                kind,
                cursor.page_number()
            ),
            _ => format!(
                "{} {} page {}",
                coordinates.display_name(),
                kind,
                cursor.page_number()
            ),
        };

        let page = with_retry(
            || self.fetch_once(&request),
            &self.options.retry,
            SyncError::is_transient,
            |e: &SyncError| short_error_message(e),
            &label,
            self.inner.progress.as_deref(),
        )
        .await?;

        tracing::debug!(
            repository_id = %self.repo.id,
            kind = %kind,
            page = cursor.page_number(),
            count = page.batch.len(),
            "Fetched page"
        );
        Ok(page)
    }

    /// One throttled, time-bounded request.
    ///
    /// Renews the lease first, so a page that spends its whole retry budget
    /// in backoff still holds the repository.
    async fn fetch_once(&self, request: &PageRequest) -> Result<ActivityPage> {
        self.keep_lease_alive().await?;

        self.inner
            .limiter
            .acquire(1, self.options.rate_limit_max_wait)
            .await?;

        let timeout = self.options.request_timeout;
        match tokio::time::timeout(timeout, self.inner.source.fetch_page(request)).await {
            Ok(page) => Ok(page?),
            Err(_) => Err(PlatformError::Timeout {
                seconds: timeout.as_secs(),
            }
            .into()),
        }
    }

    async fn checkpoint(&self) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst)
            || jobs::is_cancel_requested(self.inner.db.as_ref(), self.job_id).await?
        {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// Renew once half of the lease has elapsed.
    async fn keep_lease_alive(&self) -> Result<()> {
        let lease = self.lease.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let now = Utc::now();
        let ttl = self.options.lease_ttl;
        if lease.expires_at - now >= ttl / 2 {
            return Ok(());
        }

        let renewed = self.inner.leases.renew(&lease, ttl, now).await?;
        tracing::debug!(repository_id = %self.repo.id, expires_at = %renewed.expires_at, "Renewed sync lease");
        *self.lease.lock().unwrap_or_else(|e| e.into_inner()) = renewed;
        Ok(())
    }

    fn record_page(&self, kind: ActivityKind, cursor: PageCursor, outcome: &BatchOutcome) {
        let total = self.records.fetch_add(outcome.processed, Ordering::SeqCst) + outcome.processed;

        for error in &outcome.errors {
            emit(
                self.inner.progress.as_deref(),
                SyncProgress::RecordError {
                    repository_id: self.repo.id,
                    kind,
                    error: format!("{}: {}", error.key, error.message),
                },
            );
        }

        if outcome.total > 0 {
            emit(
                self.inner.progress.as_deref(),
                SyncProgress::PageReconciled {
                    repository_id: self.repo.id,
                    kind,
                    page: cursor.page_number(),
                    count: outcome.processed,
                    created: outcome.created,
                    total_so_far: total,
                },
            );
        }
    }

    async fn persist_progress(&self) {
        let total = self.records.load(Ordering::SeqCst);
        if let Err(e) = jobs::record_progress(self.inner.db.as_ref(), self.job_id, total).await {
            tracing::warn!(job_id = %self.job_id, error = %e, "Failed to record job progress");
        }
    }
}
