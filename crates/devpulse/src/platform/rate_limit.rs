//! Token bucket shared by every outbound call to the activity API.
//!
//! A thin wrapper over a direct `governor` limiter: refill is computed lazily
//! on each check and a consume is a single atomic state update, so concurrent
//! callers never double-spend a token. The wrapper adds a bounded wait,
//! runtime reconfiguration and an observable status.

use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::clock::Clock;
use governor::middleware::StateInformationMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use thiserror::Error;
use tokio::time::Instant;

/// Default sustained budget (requests per minute).
pub const DEFAULT_RATE_PER_MINUTE: u32 = 200;

/// Default burst capacity (tokens available at once).
pub const DEFAULT_BURST: u32 = 20;

/// Errors surfaced to callers of [`TokenBucket::acquire`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RateLimitError {
    /// Tokens would not become available within the caller's max wait.
    #[error("Rate limit backpressure: {requested} token(s) unavailable for {retry_after:?}")]
    Backpressure {
        requested: u32,
        retry_after: Duration,
    },

    /// More tokens were requested than the bucket can ever hold.
    #[error("Requested {requested} token(s) exceeds burst capacity {capacity}")]
    ExceedsCapacity { requested: u32, capacity: u32 },
}

/// Observability snapshot of the bucket.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RateLimitStatus {
    /// Tokens that can be consumed right now.
    pub remaining: u32,
    /// Bucket capacity.
    pub capacity: u32,
    /// Sustained budget per minute.
    pub per_minute: u32,
    /// When the bucket will be full again.
    pub reset_at: DateTime<Utc>,
}

/// Governor clock driven by tokio's timer, so paused-clock tests control it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        Instant::now().into_std()
    }
}

type GovernorRateLimiter =
    RateLimiter<NotKeyed, InMemoryState, TokioClock, StateInformationMiddleware>;

enum Denied {
    /// More than the burst was asked for.
    Capacity,
    /// Tokens exist again after this long.
    Wait(Duration),
}

/// One quota generation. Replaced wholesale on reconfigure.
struct Budget {
    limiter: GovernorRateLimiter,
    per_minute: u32,
    burst: u32,
    /// Remaining capacity reported by the last granted check.
    last_grant: Mutex<Option<(Instant, u32)>>,
}

impl Budget {
    fn new(per_minute: u32, burst: u32) -> Self {
        let per_minute = non_zero(per_minute);
        let burst = non_zero(burst);
        let quota = Quota::per_minute(per_minute).allow_burst(burst);

        Self {
            limiter: RateLimiter::direct_with_clock(quota, &TokioClock)
                .with_middleware::<StateInformationMiddleware>(),
            per_minute: per_minute.get(),
            burst: burst.get(),
            last_grant: Mutex::new(None),
        }
    }

    fn emission(&self) -> Duration {
        Duration::from_secs(60) / self.per_minute
    }

    fn check(&self, n: NonZeroU32) -> Result<(), Denied> {
        match self.limiter.check_n(n) {
            Ok(Ok(snapshot)) => {
                let mut last = self.last_grant.lock().unwrap_or_else(|e| e.into_inner());
                *last = Some((Instant::now(), snapshot.remaining_burst_capacity()));
                Ok(())
            }
            Ok(Err(not_until)) => Err(Denied::Wait(not_until.wait_time_from(TokioClock.now()))),
            Err(_) => Err(Denied::Capacity),
        }
    }

    fn remaining(&self) -> u32 {
        let last = *self.last_grant.lock().unwrap_or_else(|e| e.into_inner());
        let Some((granted_at, remaining)) = last else {
            return self.burst;
        };

        let refilled = granted_at.elapsed().as_nanos() / self.emission().as_nanos().max(1);
        let refilled = u32::try_from(refilled).unwrap_or(u32::MAX);
        remaining.saturating_add(refilled).min(self.burst)
    }
}

fn non_zero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

/// Shared token bucket.
///
/// Capacity is `burst`, refill rate is `per_minute / 60` tokens per second.
pub struct TokenBucket {
    budget: RwLock<Arc<Budget>>,
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let budget = self.current();
        f.debug_struct("TokenBucket")
            .field("per_minute", &budget.per_minute)
            .field("burst", &budget.burst)
            .finish()
    }
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_PER_MINUTE, DEFAULT_BURST)
    }
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// Zero values are clamped to 1.
    pub fn new(per_minute: u32, burst: u32) -> Self {
        Self {
            budget: RwLock::new(Arc::new(Budget::new(per_minute, burst))),
        }
    }

    /// Swap in a new sustained rate and burst. The new bucket starts full;
    /// waiters pick it up on their next check.
    pub fn reconfigure(&self, per_minute: u32, burst: u32) {
        let next = Arc::new(Budget::new(per_minute, burst));
        *self.budget.write().unwrap_or_else(|e| e.into_inner()) = next;
    }

    fn current(&self) -> Arc<Budget> {
        Arc::clone(&self.budget.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Consume `n` tokens if they are available right now.
    ///
    /// Returns `false` without consuming anything when the bucket is short.
    pub fn try_consume(&self, n: u32) -> bool {
        match NonZeroU32::new(n) {
            Some(n) => self.current().check(n).is_ok(),
            None => true,
        }
    }

    /// Wait until `n` tokens can be consumed, for at most `max_wait`.
    ///
    /// Returns the time spent waiting.
    ///
    /// # Errors
    ///
    /// - [`RateLimitError::ExceedsCapacity`] when `n` is larger than the burst.
    /// - [`RateLimitError::Backpressure`] when the tokens would not be available
    ///   within `max_wait`. Nothing is consumed in that case.
    pub async fn acquire(&self, n: u32, max_wait: Duration) -> Result<Duration, RateLimitError> {
        let started = Instant::now();
        let Some(cells) = NonZeroU32::new(n) else {
            return Ok(Duration::ZERO);
        };

        loop {
            let budget = self.current();
            let wait = match budget.check(cells) {
                Ok(()) => return Ok(started.elapsed()),
                Err(Denied::Capacity) => {
                    return Err(RateLimitError::ExceedsCapacity {
                        requested: n,
                        capacity: budget.burst,
                    });
                }
                Err(Denied::Wait(wait)) => wait,
            };

            if started.elapsed() + wait > max_wait {
                return Err(RateLimitError::Backpressure {
                    requested: n,
                    retry_after: wait,
                });
            }

            tracing::trace!(wait_ms = wait.as_millis() as u64, "Waiting for rate limit tokens");
            tokio::time::sleep(wait).await;
        }
    }

    /// Current remaining tokens and full-refill time.
    pub fn status(&self) -> RateLimitStatus {
        let budget = self.current();
        let remaining = budget.remaining();
        let until_full = budget.emission() * (budget.burst - remaining);

        RateLimitStatus {
            remaining,
            capacity: budget.burst,
            per_minute: budget.per_minute,
            reset_at: Utc::now()
                + chrono::Duration::from_std(until_full).unwrap_or_else(|_| chrono::Duration::zero()),
        }
    }
}
