//! Process-wide wiring of the sync engine.
//!
//! The rate limiter, orchestrator, notification service and scheduler are
//! built once per process and shared. Request handlers and CLI commands use
//! the same [`SyncRuntime`] so limiter budget and scheduler state are never
//! reset behind their back.
//!
//! ```ignore
//! use devpulse::runtime::SyncRuntime;
//!
//! let runtime = SyncRuntime::builder()
//!     .database(db)
//!     .source(Arc::new(azure_client))
//!     .credentials(Arc::new(StaticCredentials::new(Some(token))))
//!     .config(scheduler_config)
//!     .build()
//!     .await?;
//!
//! runtime.scheduler().start().await?;
//! ```

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::notification::{Notifier, NotificationService, TracingNotifier};
use crate::platform::{ActivitySource, CredentialProvider, StaticCredentials, TokenBucket};
use crate::reconcile::ReconcileError;
use crate::scheduler::{SchedulerConfig, SchedulerError, SyncScheduler};
use crate::sync::{DbLeaseStore, LeaseStore, ProgressCallback, SyncError, SyncOrchestrator};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Default)]
pub struct SyncRuntimeBuilder {
    database: Option<Arc<DatabaseConnection>>,
    source: Option<Arc<dyn ActivitySource>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    leases: Option<Arc<dyn LeaseStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    config: Option<SchedulerConfig>,
    progress: Option<Arc<ProgressCallback>>,
}

impl SyncRuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database(mut self, db: Arc<DatabaseConnection>) -> Self {
        self.database = Some(db);
        self
    }

    /// Where activity pages come from.
    pub fn source(mut self, source: Arc<dyn ActivitySource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Defaults to [`StaticCredentials`] without a fallback token.
    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Defaults to [`DbLeaseStore`] on the same database.
    pub fn leases(mut self, leases: Arc<dyn LeaseStore>) -> Self {
        self.leases = Some(leases);
        self
    }

    /// Defaults to [`TracingNotifier`].
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Used until a configuration is persisted through the scheduler.
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn progress(mut self, callback: Arc<ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Wire everything together.
    ///
    /// Also makes sure the sentinel developer exists and fails jobs left
    /// running by a crashed process.
    pub async fn build(self) -> Result<SyncRuntime> {
        let db = self
            .database
            .ok_or(RuntimeError::MissingField { field: "database" })?;
        let source = self
            .source
            .ok_or(RuntimeError::MissingField { field: "source" })?;
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(StaticCredentials::default()));
        let leases = self
            .leases
            .unwrap_or_else(|| Arc::new(DbLeaseStore::new(Arc::clone(&db))));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier));
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let limiter = Arc::new(TokenBucket::new(
            config.azure_rate_limit_per_minute,
            config.azure_burst_limit,
        ));
        let options = config.orchestrator_options();
        let orchestrator = match &self.progress {
            Some(callback) => SyncOrchestrator::with_progress(
                Arc::clone(&db),
                source,
                limiter,
                leases,
                credentials,
                options,
                Arc::clone(callback),
            ),
            None => SyncOrchestrator::new(Arc::clone(&db), source, limiter, leases, credentials, options),
        };
        let notifications = NotificationService::with_notifier(Arc::clone(&db), notifier);

        let scheduler = SyncScheduler::load(
            Arc::clone(&db),
            orchestrator.clone(),
            notifications.clone(),
            config,
            self.progress,
        )
        .await?;

        orchestrator.reconciler().ensure_sentinel().await?;
        orchestrator.recover_interrupted_jobs().await?;

        tracing::debug!("Sync runtime ready");
        Ok(SyncRuntime {
            db,
            orchestrator,
            notifications,
            scheduler,
        })
    }
}

/// The shared sync engine of one process. Cheap to clone.
#[derive(Clone)]
pub struct SyncRuntime {
    db: Arc<DatabaseConnection>,
    orchestrator: SyncOrchestrator,
    notifications: NotificationService,
    scheduler: Arc<SyncScheduler>,
}

impl SyncRuntime {
    pub fn builder() -> SyncRuntimeBuilder {
        SyncRuntimeBuilder::new()
    }

    pub fn database(&self) -> &Arc<DatabaseConnection> {
        &self.db
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    pub fn limiter(&self) -> &Arc<TokenBucket> {
        self.orchestrator.limiter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_requires_database_and_source() {
        let err = SyncRuntime::builder().build().await.err().expect("missing database");
        assert!(matches!(err, RuntimeError::MissingField { field: "database" }));
    }

    #[cfg(all(feature = "sqlite", feature = "migrate"))]
    #[tokio::test]
    async fn build_rejects_invalid_config() {
        use async_trait::async_trait;

        use crate::platform::{ActivityPage, PageRequest, PlatformError};

        struct NoSource;

        #[async_trait]
        impl ActivitySource for NoSource {
            fn name(&self) -> &str {
                "none"
            }

            async fn fetch_page(&self, _: &PageRequest) -> crate::platform::Result<ActivityPage> {
                Err(PlatformError::config("unused"))
            }
        }

        let db = crate::db::connect_and_migrate("sqlite::memory:")
            .await
            .expect("test db should migrate");
        let db = Arc::new(db);

        let missing_source = SyncRuntime::builder()
            .database(Arc::clone(&db))
            .build()
            .await
            .err()
            .expect("missing source");
        assert!(matches!(missing_source, RuntimeError::MissingField { field: "source" }));

        let invalid = SyncRuntime::builder()
            .database(db)
            .source(Arc::new(NoSource))
            .config(SchedulerConfig {
                interval_minutes: 0,
                ..SchedulerConfig::default()
            })
            .build()
            .await
            .err()
            .expect("invalid config");
        assert!(matches!(
            invalid,
            RuntimeError::Scheduler(SchedulerError::InvalidConfig { .. })
        ));
    }
}
