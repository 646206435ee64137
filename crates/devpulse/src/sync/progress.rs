//! Progress reporting types for sync operations.
//!
//! The orchestrator and scheduler emit these events through an optional
//! callback; the CLI maps them to tracing output.

use uuid::Uuid;

use crate::entity::job_status::SyncType;
use crate::platform::ActivityKind;

/// Progress events emitted during sync operations.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// A repository sync job started.
    JobStarted {
        repository_id: Uuid,
        job_id: Uuid,
        sync_type: SyncType,
    },

    /// The repository's lease was held by someone else.
    Deferred { repository_id: Uuid },

    /// Fetched and reconciled one page.
    PageReconciled {
        repository_id: Uuid,
        kind: ActivityKind,
        /// Page number (1-indexed).
        page: u32,
        /// Records on this page.
        count: usize,
        /// Records created (rather than updated).
        created: usize,
        /// Running total of upserts in this job.
        total_so_far: usize,
    },

    /// A transient failure will be retried.
    RetryScheduled {
        operation: String,
        attempt: u32,
        retry_after_ms: u64,
        error: String,
    },

    /// A record on a page could not be reconciled.
    RecordError {
        repository_id: Uuid,
        kind: ActivityKind,
        error: String,
    },

    /// The job finished successfully.
    JobCompleted {
        repository_id: Uuid,
        job_id: Uuid,
        records_processed: usize,
        duration_ms: u64,
    },

    /// The job observed a cancellation request.
    JobCancelled {
        repository_id: Uuid,
        job_id: Uuid,
        records_processed: usize,
    },

    /// The job failed.
    JobFailed {
        repository_id: Uuid,
        job_id: Option<Uuid>,
        error: String,
    },

    /// A scheduler batch started.
    BatchStarted { batch_id: Uuid, repositories: usize },

    /// A scheduler batch finished.
    BatchCompleted {
        batch_id: Uuid,
        successful: usize,
        failed: usize,
        deferred: usize,
    },

    /// A scheduler tick was skipped because a batch is still running.
    TickSkipped,
}

/// Callback type for progress reporting.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn emit_without_callback_is_noop() {
        emit(None, SyncProgress::TickSkipped);
    }

    #[test]
    fn emit_invokes_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let capture = Arc::clone(&seen);
        let callback: ProgressCallback = Box::new(move |event| {
            capture.lock().unwrap().push(format!("{event:?}"));
        });

        emit(
            Some(&callback),
            SyncProgress::Deferred {
                repository_id: Uuid::nil(),
            },
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("Deferred"));
    }
}
