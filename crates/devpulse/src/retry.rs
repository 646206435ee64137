//! Reusable retry policy for transient failures.
//!
//! A [`RetryPolicy`] is built once from the scheduler configuration
//! (`max_retries`, `retry_delay_minutes`) and shared by every page fetch.
//! The caller decides which errors are retryable.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};

use crate::sync::{ProgressCallback, SyncProgress};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay, in minutes.
pub const DEFAULT_RETRY_DELAY_MINUTES: u32 = 1;

/// Upper bound for a single backoff sleep.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30 * 60);

/// Retry policy: max attempts plus an exponential backoff function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Maximum number of retries (attempts = retries + 1).
    pub max_retries: usize,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_minutes(DEFAULT_RETRY_DELAY_MINUTES, DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    /// Create a policy with custom values.
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
            max_retries,
            with_jitter: true,
        }
    }

    /// Policy scaled by a base delay in minutes.
    ///
    /// Delays double per attempt: `d, 2d, 4d, ...`, capped at [`MAX_RETRY_DELAY`].
    #[must_use]
    pub fn from_minutes(retry_delay_minutes: u32, max_retries: u32) -> Self {
        let min_delay = Duration::from_secs(u64::from(retry_delay_minutes) * 60);
        let growth = 1u32
            .checked_shl(max_retries.saturating_sub(1))
            .unwrap_or(u32::MAX);
        let max_delay = min_delay.saturating_mul(growth).min(MAX_RETRY_DELAY);
        Self::new(min_delay, max_delay, max_retries as usize)
    }

    /// Set whether to use jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Build an exponential backoff strategy from this policy.
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder
    }
}

/// Execute an operation, retrying errors accepted by `is_retryable`.
///
/// Each scheduled retry is logged at `warn` and reported as
/// [`SyncProgress::RetryScheduled`]. Non-retryable errors and the error of the
/// final attempt are returned unchanged.
///
/// # Example
///
/// ```ignore
/// let page = with_retry(
///     || source.fetch_page(&request),
///     &policy,
///     SyncError::is_transient,
///     |e| e.to_string(),
///     "contoso/platform/api pull_requests page 2",
///     None,
/// )
/// .await?;
/// ```
pub async fn with_retry<T, E, F, Fut, IsRetryable, ShortMsg>(
    mut operation: F,
    policy: &RetryPolicy,
    is_retryable: IsRetryable,
    short_message: ShortMsg,
    label: &str,
    on_progress: Option<&ProgressCallback>,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
    IsRetryable: Fn(&E) -> bool + Send + Sync + 'static,
    ShortMsg: Fn(&E) -> String + Send + Sync + 'static,
{
    let attempt = AtomicU32::new(0);

    let retry_op = || {
        attempt.fetch_add(1, Ordering::SeqCst);
        operation()
    };

    retry_op
        .retry(policy.clone().into_backoff())
        .notify(|err, dur| {
            let current_attempt = attempt.load(Ordering::SeqCst);
            let message = short_message(err);
            if let Some(cb) = on_progress {
                cb(SyncProgress::RetryScheduled {
                    operation: label.to_string(),
                    attempt: current_attempt,
                    retry_after_ms: dur.as_millis() as u64,
                    error: message.clone(),
                });
            }
            tracing::warn!(
                operation = %label,
                attempt = current_attempt,
                retry_after_ms = dur.as_millis() as u64,
                error = %message,
                "Transient failure, retrying"
            );
        })
        .when(is_retryable)
        .await
}
