//! Result and option types of the sync orchestrator.

use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::entity::sync_job::Model as SyncJobModel;
use crate::platform::DEFAULT_PAGE_SIZE;
use crate::retry::RetryPolicy;

use super::lease::DEFAULT_LEASE_TTL_MINUTES;

/// Default bound on how long a page waits for rate limit tokens.
pub const DEFAULT_RATE_LIMIT_MAX_WAIT: Duration = Duration::from_secs(60);

/// Default timeout of one page request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How a sync invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed,
    /// Another sync of the same repository held the lease. Not a failure.
    Deferred,
    Cancelled,
    Failed,
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOutcome::Completed => write!(f, "completed"),
            SyncOutcome::Deferred => write!(f, "deferred"),
            SyncOutcome::Cancelled => write!(f, "cancelled"),
            SyncOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Result of one `sync_repository` call.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub repository_id: Uuid,
    /// Absent when no job row was created (deferral, unknown repository).
    pub job_id: Option<Uuid>,
    pub outcome: SyncOutcome,
    /// At least one record was written.
    pub has_new_data: bool,
    pub records_processed: usize,
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub error: Option<String>,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl SyncResult {
    /// A deferral: the repository is already being synced.
    pub fn deferred(repository_id: Uuid, duration: Duration) -> Self {
        Self {
            repository_id,
            job_id: None,
            outcome: SyncOutcome::Deferred,
            has_new_data: false,
            records_processed: 0,
            duration,
            error: Some("sync already in progress".to_string()),
        }
    }

    /// A failure before or outside of a job.
    pub fn failed(
        repository_id: Uuid,
        job_id: Option<Uuid>,
        duration: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            repository_id,
            job_id,
            outcome: SyncOutcome::Failed,
            has_new_data: false,
            records_processed: 0,
            duration,
            error: Some(error.into()),
        }
    }

    pub fn success(&self) -> bool {
        self.outcome == SyncOutcome::Completed
    }

    pub fn is_deferred(&self) -> bool {
        self.outcome == SyncOutcome::Deferred
    }
}

/// Tunables of the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorOptions {
    /// `$top` of every page request.
    pub page_size: u32,
    /// Lease lifetime. Renewed before every request attempt once half of it
    /// has elapsed.
    pub lease_ttl: chrono::Duration,
    /// Longest wait for rate limit tokens before surfacing backpressure.
    pub rate_limit_max_wait: Duration,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            lease_ttl: chrono::Duration::minutes(DEFAULT_LEASE_TTL_MINUTES),
            rate_limit_max_wait: DEFAULT_RATE_LIMIT_MAX_WAIT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorOptions {
    /// Longest stretch a page fetch can go without a lease renewal: one
    /// backoff sleep plus one attempt waiting out the limiter and the
    /// request timeout.
    pub fn longest_unrenewed_gap(&self) -> Duration {
        let jitter = if self.retry.with_jitter {
            self.retry.min_delay
        } else {
            Duration::ZERO
        };
        self.retry.max_delay + jitter + self.rate_limit_max_wait + self.request_timeout
    }

    /// Whether a renewal is always reached before the lease runs out.
    pub fn lease_outlives_retries(&self) -> bool {
        let half_ttl = (self.lease_ttl / 2).to_std().unwrap_or(Duration::ZERO);
        self.longest_unrenewed_gap() < half_ttl
    }
}

/// Current sync state of a repository.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub repository_id: Uuid,
    pub latest_job: Option<SyncJobModel>,
    /// A live lease exists for the repository.
    pub is_running: bool,
}
