//! Derived pull request time metrics.

use chrono::{DateTime, Utc};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Durations in days, rounded to two decimals.
///
/// A metric is `None` when one of its timestamps is missing or when the end
/// precedes the start (clock skew on the platform).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DerivedMetrics {
    /// Creation to merge (or to close, for abandoned pull requests).
    pub cycle_time_days: Option<f64>,
    /// Creation to first review.
    pub review_time_days: Option<f64>,
    /// First commit (or creation) to merge.
    pub lead_time_days: Option<f64>,
}

impl DerivedMetrics {
    pub fn compute(
        created_at: DateTime<Utc>,
        closed_at: Option<DateTime<Utc>>,
        merged_at: Option<DateTime<Utc>>,
        first_review_at: Option<DateTime<Utc>>,
        first_commit_at: Option<DateTime<Utc>>,
    ) -> Self {
        let finished = merged_at.or(closed_at);
        Self {
            cycle_time_days: finished.and_then(|end| days_between(created_at, end)),
            review_time_days: first_review_at.and_then(|end| days_between(created_at, end)),
            lead_time_days: merged_at
                .and_then(|end| days_between(first_commit_at.unwrap_or(created_at), end)),
        }
    }
}

fn days_between(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<f64> {
    let seconds = (end - start).num_milliseconds() as f64 / 1000.0;
    if seconds < 0.0 {
        return None;
    }
    Some((seconds / SECONDS_PER_DAY * 100.0).round() / 100.0)
}
