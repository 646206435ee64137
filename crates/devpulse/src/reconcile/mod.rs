//! Turns fetched activity pages into idempotent local upserts.
//!
//! - [`identity`] - maps platform actors to developer rows
//! - [`upsert`] - natural-key upserts for pull requests, commits, reviews and comments
//! - [`metrics`] - derived time metrics recomputed on every pull request write
//!
//! Every write is keyed by the record's natural key, so replaying the same
//! page leaves the stored state unchanged apart from `synced_at`.

mod identity;
mod metrics;
mod upsert;

use std::sync::Arc;

use sea_orm::{DatabaseConnection, DbErr};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::platform::{ActivityBatch, ActivityKind};

pub use metrics::DerivedMetrics;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// A page was handed over with the wrong parent scope.
    #[error("{kind} records require a {expected} scope")]
    ScopeMismatch {
        kind: ActivityKind,
        expected: &'static str,
    },

    /// A record field could not be interpreted.
    #[error("Invalid {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    /// Not enough information to match or create a developer.
    #[error("Actor has no usable identity fields")]
    EmptyIdentity,

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },
}

impl ReconcileError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(e) if crate::db::is_retryable_db_error(e))
    }
}

/// Parent of the records on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileScope {
    /// Pull requests and commits belong to a repository.
    Repository(Uuid),
    /// Reviews and comments belong to a pull request.
    PullRequest(Uuid),
}

/// Result of one upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: Uuid,
    /// `true` when the row was inserted rather than updated.
    pub created: bool,
}

/// A record that could not be reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordError {
    /// Natural key of the record on the platform.
    pub key: String,
    pub message: String,
}

/// Outcome of reconciling one page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub processed: usize,
    pub created: usize,
    pub errors: Vec<RecordError>,
    /// Local id and platform id of every pull request written, so the caller
    /// can fetch its reviews and comments.
    #[serde(skip)]
    pub pull_requests: Vec<(Uuid, String)>,
}

impl BatchOutcome {
    fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    fn record(&mut self, key: &str, result: Result<UpsertOutcome, ReconcileError>) -> Option<Uuid> {
        match result {
            Ok(outcome) => {
                self.processed += 1;
                if outcome.created {
                    self.created += 1;
                }
                Some(outcome.id)
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Failed to reconcile record");
                self.errors.push(RecordError {
                    key: key.to_string(),
                    message: err.to_string(),
                });
                None
            }
        }
    }
}

/// Writes activity records and resolves their actors.
#[derive(Clone)]
pub struct Reconciler {
    db: Arc<DatabaseConnection>,
}

impl Reconciler {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub(crate) fn db(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    /// Reconcile every record of a page.
    ///
    /// Per-record failures are collected in [`BatchOutcome::errors`]; they
    /// never abort the rest of the page.
    pub async fn reconcile_batch(&self, scope: ReconcileScope, batch: &ActivityBatch) -> BatchOutcome {
        let mut outcome = BatchOutcome::new(batch.len());

        match (scope, batch) {
            (ReconcileScope::Repository(repository_id), ActivityBatch::PullRequests(records)) => {
                for raw in records {
                    let result = self.upsert_pull_request(repository_id, raw).await;
                    if let Some(id) = outcome.record(&raw.external_id, result) {
                        outcome.pull_requests.push((id, raw.external_id.clone()));
                    }
                }
            }
            (ReconcileScope::Repository(repository_id), ActivityBatch::Commits(records)) => {
                for raw in records {
                    let result = self.upsert_commit(repository_id, raw).await;
                    outcome.record(&raw.sha, result);
                }
            }
            (ReconcileScope::PullRequest(pull_request_id), ActivityBatch::Reviews(records)) => {
                for raw in records {
                    let result = self.upsert_review(pull_request_id, raw).await;
                    outcome.record(&raw.external_id, result);
                }
            }
            (ReconcileScope::PullRequest(pull_request_id), ActivityBatch::Comments(records)) => {
                for raw in records {
                    let result = self.upsert_comment(pull_request_id, raw).await;
                    outcome.record(&raw.external_id, result);
                }
            }
            (_, batch) => {
                let expected = match batch.kind() {
                    ActivityKind::PullRequests | ActivityKind::Commits => "repository",
                    ActivityKind::Reviews | ActivityKind::Comments => "pull request",
                };
                let message = ReconcileError::ScopeMismatch {
                    kind: batch.kind(),
                    expected,
                }
                .to_string();
                tracing::error!(kind = %batch.kind(), "{message}");
                outcome.errors.push(RecordError {
                    key: batch.kind().to_string(),
                    message,
                });
            }
        }

        outcome
    }
}
