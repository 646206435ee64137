//! Platform abstraction: the activity source trait, raw record payloads,
//! error taxonomy and the shared outbound rate limiter.
//!
//! Concrete clients (see the `azure` module) implement [`ActivitySource`] and
//! perform exactly one HTTP request per page. Throttling and retry live in
//! the orchestrator so every client gets the same policy.

mod errors;
mod rate_limit;
mod types;

pub use errors::{PlatformError, Result, short_error_message};
pub use rate_limit::{
    DEFAULT_BURST, DEFAULT_RATE_PER_MINUTE, RateLimitError, RateLimitStatus, TokenBucket,
};
pub use types::{
    ActivityBatch, ActivityKind, ActivityPage, ActivitySource, ActorRef, CredentialProvider,
    DEFAULT_PAGE_SIZE, PageCursor, PageRequest, PullRequestTimeRange, RawComment, RawCommit, RawIdentity,
    RawPullRequest, RawReview, RepositoryCoordinates, StaticCredentials, SyncWindow,
};
