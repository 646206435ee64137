use devpulse::sync::SyncProgress;

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, event: SyncProgress) {
        match event {
            SyncProgress::JobStarted {
                repository_id,
                job_id,
                sync_type,
            } => {
                tracing::info!(
                    repository_id = %repository_id,
                    job_id = %job_id,
                    sync_type = %sync_type,
                    "Sync started"
                );
            }

            SyncProgress::Deferred { repository_id } => {
                tracing::info!(repository_id = %repository_id, "Sync already in progress, deferred");
            }

            SyncProgress::PageReconciled {
                repository_id,
                kind,
                page,
                count,
                created,
                total_so_far,
            } => {
                tracing::debug!(
                    repository_id = %repository_id,
                    kind = %kind,
                    page,
                    count,
                    created,
                    total_so_far,
                    "Reconciled page"
                );
            }

            SyncProgress::RetryScheduled {
                operation,
                attempt,
                retry_after_ms,
                error,
            } => {
                tracing::warn!(
                    operation = %operation,
                    attempt,
                    retry_after_ms,
                    error = %error,
                    "Transient failure, retrying"
                );
            }

            SyncProgress::RecordError {
                repository_id,
                kind,
                error,
            } => {
                tracing::warn!(repository_id = %repository_id, kind = %kind, error = %error, "Record skipped");
            }

            SyncProgress::JobCompleted {
                repository_id,
                job_id,
                records_processed,
                duration_ms,
            } => {
                tracing::info!(
                    repository_id = %repository_id,
                    job_id = %job_id,
                    records_processed,
                    duration_ms,
                    "Sync complete"
                );
            }

            SyncProgress::JobCancelled {
                repository_id,
                job_id,
                records_processed,
            } => {
                tracing::info!(repository_id = %repository_id, job_id = %job_id, records_processed, "Sync cancelled");
            }

            SyncProgress::JobFailed {
                repository_id,
                job_id,
                error,
            } => {
                tracing::error!(repository_id = %repository_id, job_id = ?job_id, error = %error, "Sync failed");
            }

            SyncProgress::BatchStarted {
                batch_id,
                repositories,
            } => {
                tracing::info!(batch_id = %batch_id, repositories, "Batch started");
            }

            SyncProgress::BatchCompleted {
                batch_id,
                successful,
                failed,
                deferred,
            } => {
                tracing::info!(batch_id = %batch_id, successful, failed, deferred, "Batch complete");
            }

            SyncProgress::TickSkipped => {
                tracing::warn!("Previous batch still running, skipping tick");
            }

            _ => {}
        }
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}
