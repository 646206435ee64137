use sea_orm::DbErr;
use thiserror::Error;

use crate::db::is_retryable_db_error;
use crate::platform::{PlatformError, RateLimitError};
use crate::reconcile::ReconcileError;
use crate::repository::RepositoryError;

use super::lease::LeaseError;

/// Errors that end (or retry) a repository sync.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// A cancellation request was observed between pages.
    #[error("Sync cancelled")]
    Cancelled,

    /// The job task panicked or was aborted.
    #[error("Sync task failed: {0}")]
    TaskPanicked(String),
}

impl SyncError {
    /// Whether retrying the same page can succeed.
    ///
    /// Auth, not found, configuration and decode errors are fatal: the job
    /// fails immediately because retrying cannot help.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Platform(e) => e.is_transient(),
            Self::RateLimit(RateLimitError::Backpressure { .. }) => true,
            Self::RateLimit(RateLimitError::ExceedsCapacity { .. }) => false,
            Self::Database(e) => is_retryable_db_error(e),
            Self::Repository(RepositoryError::Database(e)) => is_retryable_db_error(e),
            Self::Reconcile(e) => e.is_transient(),
            Self::Lease(LeaseError::Database(e)) => is_retryable_db_error(e),
            Self::Repository(_)
            | Self::Lease(_)
            | Self::Cancelled
            | Self::TaskPanicked(_) => false,
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
