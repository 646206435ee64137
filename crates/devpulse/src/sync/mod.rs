//! Repository sync orchestration.
//!
//! # Module Structure
//!
//! - [`orchestrator`] - `SyncOrchestrator`: lease, job row, paged fetch, finalize
//! - [`lease`] - exclusive expiring claims per repository (`LeaseStore`)
//! - [`jobs`] - `sync_jobs` persistence
//! - [`types`] - `SyncResult`, `SyncOutcome`, `OrchestratorOptions`, `SyncStatus`
//! - [`progress`] - progress reporting: `SyncProgress`, `ProgressCallback`, `emit()`
//!
//! # Example
//!
//! ```ignore
//! use devpulse::sync::{SyncOrchestrator, OrchestratorOptions, DbLeaseStore};
//! use devpulse::SyncType;
//!
//! let orchestrator = SyncOrchestrator::new(db, source, limiter, leases, credentials,
//!     OrchestratorOptions::default());
//! let result = orchestrator.sync_repository(repository_id, SyncType::Incremental).await;
//! println!("{} records, outcome {}", result.records_processed, result.outcome);
//! ```

mod errors;
pub mod jobs;
pub mod lease;
mod orchestrator;
mod progress;
mod types;

pub use errors::{Result, SyncError};
pub use lease::{
    DEFAULT_LEASE_TTL_MINUTES, DbLeaseStore, InMemoryLeaseStore, Lease, LeaseError, LeaseStore,
};
pub use orchestrator::SyncOrchestrator;
pub use progress::{ProgressCallback, SyncProgress, emit};
pub use types::{
    DEFAULT_RATE_LIMIT_MAX_WAIT, DEFAULT_REQUEST_TIMEOUT, OrchestratorOptions, SyncOutcome,
    SyncResult, SyncStatus,
};
