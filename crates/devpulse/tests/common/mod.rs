//! Shared fixtures for integration tests: a scripted activity source and a
//! runtime wired against an in-memory SQLite database.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use devpulse::entity::prelude::*;
use devpulse::platform::{
    ActivityBatch, ActivityKind, ActivityPage, ActivitySource, ActorRef, PageCursor, PageRequest,
    PlatformError, PullRequestTimeRange, RawComment, RawCommit, RawIdentity, RawPullRequest, RawReview,
    StaticCredentials, SyncWindow,
};
use devpulse::repository::{self, NewRepository};
use devpulse::retry::RetryPolicy;
use devpulse::{SchedulerConfig, SyncRuntime, connect_and_migrate};
use secrecy::SecretString;
use sea_orm::DatabaseConnection;
use tokio::sync::{Notify, Semaphore};

/// Maximum time any sync operation should take in tests.
/// If exceeded, there's likely a hang/deadlock.
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// One request as the source saw it.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub kind: ActivityKind,
    pub window: SyncWindow,
    pub cursor: PageCursor,
    pub time_range: PullRequestTimeRange,
    pub pull_request: Option<String>,
}

/// In-memory activity source.
///
/// Serves whatever was scripted with the `set_*` methods, filtered by the
/// request window (creation or closing time for pull requests) and sliced by
/// the cursor. Failures queued with
/// [`fail_next`](Self::fail_next) are returned before any data. When gated,
/// every request waits for a permit from [`open`](Self::open).
#[derive(Default)]
pub struct FakeSource {
    pull_requests: Mutex<Vec<RawPullRequest>>,
    commits: Mutex<Vec<RawCommit>>,
    reviews: Mutex<HashMap<String, Vec<RawReview>>>,
    comments: Mutex<HashMap<String, Vec<RawComment>>>,
    failures: Mutex<VecDeque<PlatformError>>,
    requests: Mutex<Vec<SeenRequest>>,
    calls: AtomicUsize,
    gate: Option<Semaphore>,
    entered: Notify,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose requests block until [`open`](Self::open) is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn set_pull_requests(&self, records: Vec<RawPullRequest>) {
        *self.pull_requests.lock().unwrap() = records;
    }

    pub fn set_commits(&self, records: Vec<RawCommit>) {
        *self.commits.lock().unwrap() = records;
    }

    pub fn set_reviews(&self, pull_request: &str, records: Vec<RawReview>) {
        self.reviews
            .lock()
            .unwrap()
            .insert(pull_request.to_string(), records);
    }

    pub fn set_comments(&self, pull_request: &str, records: Vec<RawComment>) {
        self.comments
            .lock()
            .unwrap()
            .insert(pull_request.to_string(), records);
    }

    /// Make the next request fail with `error`.
    pub fn fail_next(&self, error: PlatformError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// Let `permits` more requests through the gate.
    pub fn open(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    /// Wait until a request has reached the source.
    pub async fn wait_entered(&self) {
        tokio::time::timeout(SYNC_TIMEOUT, self.entered.notified())
            .await
            .expect("source was never called");
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_of(&self, kind: ActivityKind) -> Vec<SeenRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.kind == kind)
            .collect()
    }

    fn page<T: Clone>(records: Vec<T>, cursor: PageCursor) -> (Vec<T>, Option<PageCursor>) {
        let items: Vec<T> = records
            .into_iter()
            .skip(cursor.skip as usize)
            .take(cursor.top as usize)
            .collect();
        let next = cursor.next_after(items.len());
        (items, next)
    }
}

#[async_trait]
impl ActivitySource for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch_page(&self, request: &PageRequest) -> devpulse::platform::Result<ActivityPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(SeenRequest {
            kind: request.kind,
            window: request.window,
            cursor: request.cursor,
            time_range: request.time_range,
            pull_request: request.pull_request.clone(),
        });
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| PlatformError::network(e.to_string()))?
                .forget();
        }

        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let window = request.window;
        let (batch, next) = match request.kind {
            ActivityKind::PullRequests => {
                let records: Vec<_> = self
                    .pull_requests
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|pr| match (request.time_range, window.from) {
                        (PullRequestTimeRange::Closed, Some(_)) => {
                            pr.closed_at.is_some_and(|closed| window.contains(closed))
                        }
                        _ => window.contains(pr.created_at),
                    })
                    .cloned()
                    .collect();
                let (items, next) = Self::page(records, request.cursor);
                (ActivityBatch::PullRequests(items), next)
            }
            ActivityKind::Commits => {
                let records: Vec<_> = self
                    .commits
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|c| window.contains(c.authored_at))
                    .cloned()
                    .collect();
                let (items, next) = Self::page(records, request.cursor);
                (ActivityBatch::Commits(items), next)
            }
            ActivityKind::Reviews => {
                let key = request.require_pull_request()?;
                let records = self
                    .reviews
                    .lock()
                    .unwrap()
                    .get(key)
                    .cloned()
                    .unwrap_or_default();
                let (items, next) = Self::page(records, request.cursor);
                (ActivityBatch::Reviews(items), next)
            }
            ActivityKind::Comments => {
                let key = request.require_pull_request()?;
                let records = self
                    .comments
                    .lock()
                    .unwrap()
                    .get(key)
                    .cloned()
                    .unwrap_or_default();
                let (items, next) = Self::page(records, request.cursor);
                (ActivityBatch::Comments(items), next)
            }
        };

        Ok(ActivityPage { batch, next })
    }
}

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
}

pub fn person(name: &str) -> ActorRef {
    ActorRef::External(RawIdentity {
        external_id: Some(format!("id-{name}")),
        display_name: Some(name.to_string()),
        email: Some(format!("{name}@contoso.com")),
        login: Some(name.to_string()),
    })
}

pub fn nobody() -> ActorRef {
    ActorRef::External(RawIdentity::default())
}

pub fn pull_request(external_id: &str, author: ActorRef, created_at: DateTime<Utc>) -> RawPullRequest {
    RawPullRequest {
        external_id: external_id.to_string(),
        title: format!("Pull request {external_id}"),
        description: None,
        state: "active".to_string(),
        author,
        source_branch: format!("feature/{external_id}"),
        target_branch: "main".to_string(),
        is_draft: false,
        created_at,
        closed_at: None,
        merged_at: None,
        first_commit_at: None,
    }
}

pub fn commit(sha: &str, author: ActorRef, authored_at: DateTime<Utc>) -> RawCommit {
    RawCommit {
        sha: sha.to_string(),
        author,
        message: format!("Commit {sha}"),
        authored_at,
        committed_at: Some(authored_at),
        additions: 3,
        edits: 1,
        deletions: 0,
    }
}

pub fn review(reviewer: &str, vote: i32) -> RawReview {
    RawReview {
        external_id: format!("id-{reviewer}"),
        reviewer: person(reviewer),
        vote,
        is_required: false,
        submitted_at: None,
    }
}

pub fn comment(thread: u32, id: u32, author: ActorRef, published_at: DateTime<Utc>) -> RawComment {
    RawComment {
        external_id: format!("{thread}:{id}"),
        thread_id: thread.to_string(),
        author,
        content: format!("comment {id} on thread {thread}"),
        published_at,
        edited_at: None,
    }
}

/// Configuration with a budget large enough to never throttle a test.
pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        delay_between_repos_seconds: 0,
        azure_rate_limit_per_minute: 60_000,
        azure_burst_limit: 1_000,
        page_size: 2,
        ..SchedulerConfig::default()
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(20), 3)
}

pub async fn setup_test_db() -> Arc<DatabaseConnection> {
    Arc::new(
        connect_and_migrate("sqlite::memory:")
            .await
            .expect("Failed to create test database"),
    )
}

pub async fn setup_runtime(source: Arc<FakeSource>) -> SyncRuntime {
    setup_runtime_with(source, test_config()).await
}

pub async fn setup_runtime_with(source: Arc<FakeSource>, config: SchedulerConfig) -> SyncRuntime {
    let runtime = SyncRuntime::builder()
        .database(setup_test_db().await)
        .source(source)
        .credentials(Arc::new(StaticCredentials::new(Some(SecretString::from(
            "test-pat".to_string(),
        )))))
        .config(config)
        .build()
        .await
        .expect("runtime should build");
    runtime.orchestrator().set_retry_policy(fast_retry());
    runtime
}

pub async fn insert_repository(db: &DatabaseConnection, name: &str) -> TrackedRepositoryModel {
    repository::insert(
        db,
        NewRepository {
            name: name.to_string(),
            organization: "contoso".to_string(),
            project: "platform".to_string(),
            base_url: "https://dev.azure.com".to_string(),
            external_id: Some(format!("repo-{name}")),
            credential: None,
        },
    )
    .await
    .expect("repository should insert")
}
