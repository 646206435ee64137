//! Devpulse - sync orchestration for source-control activity.
//!
//! This library ingests pull requests, commits, reviews and comments from an
//! Azure DevOps-style API into a local database: a shared token bucket
//! throttles outbound calls, a lease keeps at most one sync per repository,
//! a reconciler turns pages into idempotent upserts with identity
//! resolution, and a scheduler runs periodic batches and reports them
//! through idempotent notifications.
//!
//! # Features
//!
//! - `sqlite` / `postgres` - database backends.
//! - `migrate` - embedded migrations and [`connect_and_migrate`].
//! - `azure` - the Azure DevOps REST client ([`azure::AzureDevOpsClient`]).
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use devpulse::{connect_and_migrate, runtime::SyncRuntime, SyncType};
//!
//! let db = Arc::new(connect_and_migrate("sqlite://devpulse.db?mode=rwc").await?);
//! let runtime = SyncRuntime::builder()
//!     .database(db)
//!     .source(Arc::new(client))
//!     .build()
//!     .await?;
//!
//! let result = runtime.orchestrator().sync_repository(repository_id, SyncType::Full).await;
//! ```

pub mod db;
pub mod entity;
pub mod monitoring;
pub mod notification;
pub mod platform;
pub mod reconcile;
pub mod repository;
pub mod retry;
pub mod runtime;
pub mod scheduler;
pub mod sync;

#[cfg(feature = "azure")]
pub mod azure;

#[cfg(feature = "azure")]
pub mod http;

#[cfg(feature = "migrate")]
pub mod migration;

pub use db::connect;
#[cfg(feature = "migrate")]
pub use db::connect_and_migrate;
pub use entity::prelude::*;
pub use notification::{NotificationError, NotificationService};
pub use platform::{ActivitySource, PlatformError, RateLimitStatus, TokenBucket};
pub use reconcile::Reconciler;
pub use repository::RepositoryError;
pub use runtime::{RuntimeError, SyncRuntime};
pub use scheduler::{BatchSummary, SchedulerConfig, SchedulerError, SchedulerStatus, SyncScheduler};
pub use sync::{SyncError, SyncOrchestrator, SyncOutcome, SyncResult};
