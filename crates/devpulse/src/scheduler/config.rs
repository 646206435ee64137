use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::platform::{DEFAULT_BURST, DEFAULT_PAGE_SIZE, DEFAULT_RATE_PER_MINUTE};
use crate::retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MINUTES, RetryPolicy};
use crate::sync::{DEFAULT_LEASE_TTL_MINUTES, OrchestratorOptions};

use super::SchedulerError;

/// Scheduler and sync tunables, editable at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minutes between two batches.
    pub interval_minutes: u32,
    /// Repositories synced concurrently within a batch.
    pub max_concurrent_repos: u32,
    /// Pause between two dispatches of the same group.
    pub delay_between_repos_seconds: u32,
    /// Retries of a failing page after the first attempt.
    pub max_retries: u32,
    /// Base delay of the exponential backoff.
    pub retry_delay_minutes: u32,
    pub notification_enabled: bool,
    pub notification_recipients: Vec<String>,
    /// Failed syncs in one batch before a failure digest goes out.
    pub failure_notification_threshold: u32,
    pub azure_rate_limit_per_minute: u32,
    pub azure_burst_limit: u32,
    pub lease_ttl_minutes: u32,
    pub request_timeout_seconds: u32,
    pub rate_limit_max_wait_seconds: u32,
    pub page_size: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 60,
            max_concurrent_repos: 3,
            delay_between_repos_seconds: 2,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_minutes: DEFAULT_RETRY_DELAY_MINUTES,
            notification_enabled: false,
            notification_recipients: Vec::new(),
            failure_notification_threshold: 1,
            azure_rate_limit_per_minute: DEFAULT_RATE_PER_MINUTE,
            azure_burst_limit: DEFAULT_BURST,
            lease_ttl_minutes: DEFAULT_LEASE_TTL_MINUTES as u32,
            request_timeout_seconds: 30,
            rate_limit_max_wait_seconds: 60,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl SchedulerConfig {
    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        let invalid = |message: &str| {
            Err(SchedulerError::InvalidConfig {
                message: message.to_string(),
            })
        };

        if self.interval_minutes == 0 {
            return invalid("interval_minutes must be at least 1");
        }
        if self.max_concurrent_repos == 0 {
            return invalid("max_concurrent_repos must be at least 1");
        }
        if self.retry_delay_minutes == 0 && self.max_retries > 0 {
            return invalid("retry_delay_minutes must be at least 1 when retries are enabled");
        }
        if self.azure_rate_limit_per_minute == 0 {
            return invalid("azure_rate_limit_per_minute must be at least 1");
        }
        if self.azure_burst_limit == 0 {
            return invalid("azure_burst_limit must be at least 1");
        }
        if u64::from(self.azure_burst_limit) > u64::from(self.azure_rate_limit_per_minute) * 60 {
            return invalid("azure_burst_limit cannot exceed an hour of sustained budget");
        }
        if self.lease_ttl_minutes == 0 {
            return invalid("lease_ttl_minutes must be at least 1");
        }
        if self.request_timeout_seconds == 0 {
            return invalid("request_timeout_seconds must be at least 1");
        }
        if self.page_size == 0 {
            return invalid("page_size must be at least 1");
        }
        if !self.orchestrator_options().lease_outlives_retries() {
            return invalid(
                "lease_ttl_minutes must exceed twice the longest retry delay plus \
                 request_timeout_seconds and rate_limit_max_wait_seconds",
            );
        }
        if self.notification_enabled
            && self
                .notification_recipients
                .iter()
                .all(|r| r.trim().is_empty())
        {
            return invalid("notification_recipients cannot be empty when notifications are enabled");
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_minutes) * 60)
    }

    pub fn delay_between_repos(&self) -> Duration {
        Duration::from_secs(u64::from(self.delay_between_repos_seconds))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_minutes(self.retry_delay_minutes, self.max_retries)
    }

    /// Orchestrator options derived from this configuration.
    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            page_size: self.page_size,
            lease_ttl: chrono::Duration::minutes(i64::from(self.lease_ttl_minutes)),
            rate_limit_max_wait: Duration::from_secs(u64::from(self.rate_limit_max_wait_seconds)),
            request_timeout: Duration::from_secs(u64::from(self.request_timeout_seconds)),
            retry: self.retry_policy(),
        }
    }

    /// Recipients with blank entries removed.
    pub fn recipients(&self) -> Vec<String> {
        self.notification_recipients
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Set one field from its string form, as used by `config set`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SchedulerError> {
        fn number(key: &str, value: &str) -> Result<u32, SchedulerError> {
            value.trim().parse().map_err(|_| SchedulerError::InvalidConfig {
                message: format!("{key} expects a non-negative integer, got '{value}'"),
            })
        }

        match key {
            "interval_minutes" => self.interval_minutes = number(key, value)?,
            "max_concurrent_repos" => self.max_concurrent_repos = number(key, value)?,
            "delay_between_repos_seconds" => self.delay_between_repos_seconds = number(key, value)?,
            "max_retries" => self.max_retries = number(key, value)?,
            "retry_delay_minutes" => self.retry_delay_minutes = number(key, value)?,
            "failure_notification_threshold" => {
                self.failure_notification_threshold = number(key, value)?
            }
            "azure_rate_limit_per_minute" => self.azure_rate_limit_per_minute = number(key, value)?,
            "azure_burst_limit" => self.azure_burst_limit = number(key, value)?,
            "lease_ttl_minutes" => self.lease_ttl_minutes = number(key, value)?,
            "request_timeout_seconds" => self.request_timeout_seconds = number(key, value)?,
            "rate_limit_max_wait_seconds" => self.rate_limit_max_wait_seconds = number(key, value)?,
            "page_size" => self.page_size = number(key, value)?,
            "notification_enabled" => {
                self.notification_enabled = match value.trim().to_lowercase().as_str() {
                    "true" | "yes" | "1" | "on" => true,
                    "false" | "no" | "0" | "off" => false,
                    _ => {
                        return Err(SchedulerError::InvalidConfig {
                            message: format!("{key} expects true or false, got '{value}'"),
                        });
                    }
                }
            }
            "notification_recipients" => {
                self.notification_recipients = value
                    .split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => {
                return Err(SchedulerError::InvalidConfig {
                    message: format!("unknown configuration key '{key}'"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SchedulerConfig::default();
        config.validate().expect("defaults should validate");
        assert_eq!(config.interval(), Duration::from_secs(3600));
        assert_eq!(config.retry_policy(), RetryPolicy::from_minutes(1, 3));
    }

    #[test]
    fn validate_rejects_unusable_values() {
        let cases: Vec<(&str, Box<dyn Fn(&mut SchedulerConfig)>)> = vec![
            ("interval", Box::new(|c| c.interval_minutes = 0)),
            ("concurrency", Box::new(|c| c.max_concurrent_repos = 0)),
            ("rate", Box::new(|c| c.azure_rate_limit_per_minute = 0)),
            ("burst", Box::new(|c| c.azure_burst_limit = 0)),
            (
                "burst above hourly budget",
                Box::new(|c| {
                    c.azure_rate_limit_per_minute = 1;
                    c.azure_burst_limit = 61;
                }),
            ),
            (
                "notifications without recipients",
                Box::new(|c| {
                    c.notification_enabled = true;
                    c.notification_recipients = vec!["  ".into()];
                }),
            ),
        ];

        for (name, mutate) in cases {
            let mut config = SchedulerConfig::default();
            mutate(&mut config);
            assert!(config.validate().is_err(), "{name} should be rejected");
        }
    }

    #[test]
    fn validate_rejects_leases_shorter_than_retry_backoff() {
        // 10, 20, 40, 80 minute delays cap at 30; one such sleep plus the
        // request bounds outlasts half of an hour-long lease.
        let config = SchedulerConfig {
            lease_ttl_minutes: 60,
            retry_delay_minutes: 10,
            max_retries: 5,
            ..SchedulerConfig::default()
        };
        let err = config.validate().expect_err("lease would lapse during backoff");
        assert!(err.to_string().contains("lease_ttl_minutes"));

        let longer_lease = SchedulerConfig {
            lease_ttl_minutes: 120,
            ..config
        };
        longer_lease.validate().expect("two-hour lease covers the backoff");
    }

    #[test]
    fn set_parses_values() {
        let mut config = SchedulerConfig::default();
        config.set("interval_minutes", "15").unwrap();
        config.set("notification_enabled", "yes").unwrap();
        config
            .set("notification_recipients", "lead@example.com, ops@example.com,")
            .unwrap();

        assert_eq!(config.interval_minutes, 15);
        assert!(config.notification_enabled);
        assert_eq!(config.recipients().len(), 2);

        assert!(config.set("interval_minutes", "-1").is_err());
        assert!(config.set("no_such_key", "1").is_err());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: SchedulerConfig =
            serde_json::from_value(serde_json::json!({ "interval_minutes": 5 })).unwrap();
        assert_eq!(config.interval_minutes, 5);
        assert_eq!(config.max_concurrent_repos, 3);
    }

    #[test]
    fn orchestrator_options_follow_config() {
        let config = SchedulerConfig {
            page_size: 50,
            lease_ttl_minutes: 10,
            ..SchedulerConfig::default()
        };
        let options = config.orchestrator_options();
        assert_eq!(options.page_size, 50);
        assert_eq!(options.lease_ttl, chrono::Duration::minutes(10));
    }
}
