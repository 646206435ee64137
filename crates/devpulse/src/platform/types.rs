use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::tracked_repository::Model as TrackedRepositoryModel;

use super::errors::{PlatformError, Result};

/// Default page size for list endpoints.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Where a repository lives and how to authenticate against it.
#[derive(Clone)]
pub struct RepositoryCoordinates {
    /// Local repository id (for logging and progress).
    pub repository_id: Uuid,
    pub base_url: String,
    pub organization: String,
    pub project: String,
    /// Repository id or name used in API paths.
    pub repository: String,
    pub credential: Arc<SecretString>,
}

impl RepositoryCoordinates {
    pub fn from_model(model: &TrackedRepositoryModel, credential: Arc<SecretString>) -> Self {
        Self {
            repository_id: model.id,
            base_url: model.base_url.trim_end_matches('/').to_string(),
            organization: model.organization.clone(),
            project: model.project.clone(),
            repository: model.api_identifier().to_string(),
            credential,
        }
    }

    /// `organization/project/repository` for logs.
    pub fn display_name(&self) -> String {
        format!("{}/{}/{}", self.organization, self.project, self.repository)
    }
}

impl std::fmt::Debug for RepositoryCoordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryCoordinates")
            .field("repository_id", &self.repository_id)
            .field("base_url", &self.base_url)
            .field("organization", &self.organization)
            .field("project", &self.project)
            .field("repository", &self.repository)
            .finish_non_exhaustive()
    }
}

/// Kind of activity record a page holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    PullRequests,
    Commits,
    /// Reviews of one pull request.
    Reviews,
    /// Comments of one pull request.
    Comments,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityKind::PullRequests => write!(f, "pull_requests"),
            ActivityKind::Commits => write!(f, "commits"),
            ActivityKind::Reviews => write!(f, "reviews"),
            ActivityKind::Comments => write!(f, "comments"),
        }
    }
}

/// Time window of a sync. `from = None` means from the beginning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: DateTime<Utc>,
}

impl SyncWindow {
    /// Unbounded window ending at `to`.
    pub fn full(to: DateTime<Utc>) -> Self {
        Self { from: None, to }
    }

    /// Window starting at `from` (or the epoch) and ending at `to`.
    pub fn since(from: Option<DateTime<Utc>>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)),
            to,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| at >= from) && at <= self.to
    }
}

/// Which pull request timestamp a bounded window filters on.
///
/// An incremental sync needs both: a pull request opened before the window
/// but completed or abandoned inside it only shows up in a `Closed` query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PullRequestTimeRange {
    #[default]
    Created,
    Closed,
}

impl PullRequestTimeRange {
    /// Value of the `queryTimeRangeType` search criterion.
    pub fn as_str(self) -> &'static str {
        match self {
            PullRequestTimeRange::Created => "created",
            PullRequestTimeRange::Closed => "closed",
        }
    }
}

/// Offset pagination cursor (`$top` / `$skip`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub skip: u32,
    pub top: u32,
}

impl PageCursor {
    pub fn first(top: u32) -> Self {
        Self { skip: 0, top }
    }

    /// Cursor for the page after one that returned `received` items.
    ///
    /// `None` when the page was short, meaning there is nothing more.
    pub fn next_after(self, received: usize) -> Option<Self> {
        if received < self.top as usize || received == 0 {
            None
        } else {
            Some(Self {
                skip: self.skip + received as u32,
                top: self.top,
            })
        }
    }

    /// 1-indexed page number for progress reporting.
    pub fn page_number(self) -> u32 {
        if self.top == 0 {
            1
        } else {
            self.skip / self.top + 1
        }
    }
}

/// One page request.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub repository: RepositoryCoordinates,
    pub kind: ActivityKind,
    pub window: SyncWindow,
    pub cursor: PageCursor,
    /// Timestamp a windowed pull request page filters on. Ignored by the
    /// other kinds and by unbounded windows.
    pub time_range: PullRequestTimeRange,
    /// Platform pull request id; required for reviews and comments.
    pub pull_request: Option<String>,
}

impl PageRequest {
    /// Pull request id or a configuration error for child pages.
    pub fn require_pull_request(&self) -> Result<&str> {
        self.pull_request.as_deref().ok_or_else(|| {
            PlatformError::config(format!("{} page requested without a pull request", self.kind))
        })
    }
}

/// Raw actor payload as seen on the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawIdentity {
    /// Platform user id.
    pub external_id: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    /// Unique name / login.
    pub login: Option<String>,
}

impl RawIdentity {
    /// Whether any field usable for matching or creating is present.
    pub fn is_empty(&self) -> bool {
        self.external_id.is_none()
            && self.email.is_none()
            && self.login.is_none()
            && self.display_name.is_none()
    }
}

/// Actor reference decided by the caller: already resolved, or raw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ActorRef {
    Resolved(Uuid),
    External(RawIdentity),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPullRequest {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    /// `active`, `completed` or `abandoned`.
    pub state: String,
    pub author: ActorRef,
    pub source_branch: String,
    pub target_branch: String,
    pub is_draft: bool,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub first_commit_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCommit {
    pub sha: String,
    pub author: ActorRef,
    pub message: String,
    pub authored_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
    pub additions: i32,
    pub edits: i32,
    pub deletions: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReview {
    /// Reviewer's platform id; one review per reviewer per pull request.
    pub external_id: String,
    pub reviewer: ActorRef,
    pub vote: i32,
    pub is_required: bool,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawComment {
    /// `"{thread_id}:{comment_id}"`.
    pub external_id: String,
    pub thread_id: String,
    pub author: ActorRef,
    pub content: String,
    pub published_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

/// Typed contents of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "records", rename_all = "snake_case")]
pub enum ActivityBatch {
    PullRequests(Vec<RawPullRequest>),
    Commits(Vec<RawCommit>),
    Reviews(Vec<RawReview>),
    Comments(Vec<RawComment>),
}

impl ActivityBatch {
    pub fn len(&self) -> usize {
        match self {
            Self::PullRequests(v) => v.len(),
            Self::Commits(v) => v.len(),
            Self::Reviews(v) => v.len(),
            Self::Comments(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ActivityKind {
        match self {
            Self::PullRequests(_) => ActivityKind::PullRequests,
            Self::Commits(_) => ActivityKind::Commits,
            Self::Reviews(_) => ActivityKind::Reviews,
            Self::Comments(_) => ActivityKind::Comments,
        }
    }

    /// An empty batch of the given kind.
    pub fn empty(kind: ActivityKind) -> Self {
        match kind {
            ActivityKind::PullRequests => Self::PullRequests(Vec::new()),
            ActivityKind::Commits => Self::Commits(Vec::new()),
            ActivityKind::Reviews => Self::Reviews(Vec::new()),
            ActivityKind::Comments => Self::Comments(Vec::new()),
        }
    }
}

/// A fetched page and the cursor of the page after it.
#[derive(Debug, Clone)]
pub struct ActivityPage {
    pub batch: ActivityBatch,
    pub next: Option<PageCursor>,
}

/// Source of paginated activity records.
///
/// Implementations perform exactly one remote request per call and never
/// retry or throttle; the orchestrator owns both concerns.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Short platform label for logs.
    fn name(&self) -> &str;

    /// Fetch one page.
    async fn fetch_page(&self, request: &PageRequest) -> Result<ActivityPage>;
}

/// Resolves the secret used to call the platform for a repository.
pub trait CredentialProvider: Send + Sync {
    /// # Errors
    /// Returns [`PlatformError::Config`] when no credential is available.
    fn credential_for(&self, repository: &TrackedRepositoryModel) -> Result<Arc<SecretString>>;
}

/// Credential provider backed by a configured token.
///
/// A repository's stored credential is used when present; otherwise the
/// configured fallback token applies.
#[derive(Default)]
pub struct StaticCredentials {
    fallback: Option<Arc<SecretString>>,
}

impl StaticCredentials {
    pub fn new(fallback: Option<SecretString>) -> Self {
        Self {
            fallback: fallback.map(Arc::new),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn credential_for(&self, repository: &TrackedRepositoryModel) -> Result<Arc<SecretString>> {
        if let Some(stored) = repository
            .encrypted_credential
            .as_deref()
            .filter(|c| !c.is_empty())
        {
            return Ok(Arc::new(SecretString::from(stored)));
        }

        self.fallback.clone().ok_or_else(|| {
            PlatformError::config(format!(
                "no credential configured for repository {}",
                repository.full_name()
            ))
        })
    }
}
