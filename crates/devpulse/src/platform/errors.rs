use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur when talking to the activity platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// API error from the platform that does not fit another variant.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Platform-side 5xx.
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Rate limit exceeded on the platform side (HTTP 429).
    #[error("Rate limit exceeded. Resets at {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    /// Authentication required or failed (bad credential, missing permission).
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// Resource not found (project, repository, pull request).
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// Network or connection error.
    #[error("Network error: {message}")]
    Network { message: String },

    /// The request did not complete in time.
    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The response body could not be decoded.
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Invalid client configuration (base URL, missing credential).
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl PlatformError {
    /// Create an API error.
    #[inline]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a not found error.
    #[inline]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a network error.
    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an authentication error.
    #[inline]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Map an HTTP status and body to an error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Auth { message },
            404 => Self::NotFound { resource: message },
            429 => Self::RateLimited {
                reset_at: Utc::now() + chrono::Duration::minutes(1),
            },
            500..=599 => Self::Server { status, message },
            _ => Self::Api { status, message },
        }
    }

    /// Check if this error is a rate limit error.
    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Whether retrying the same request can succeed.
    ///
    /// Network failures, timeouts, 5xx and 429 are transient. Auth, not found,
    /// configuration and decode errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Server { .. } | Self::RateLimited { .. } | Self::Network { .. } | Self::Timeout { .. }
        ) || matches!(self, Self::Api { status: 408, .. })
    }
}

/// Extract a short error message suitable for display.
///
/// Takes the first line of an error message, which is useful for errors
/// that include backtraces or multi-line details.
#[inline]
pub fn short_error_message(e: &impl std::error::Error) -> String {
    let full = e.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}

/// Result type for platform operations.
pub type Result<T> = std::result::Result<T, PlatformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            PlatformError::from_status(401, "nope"),
            PlatformError::Auth { .. }
        ));
        assert!(matches!(
            PlatformError::from_status(403, "forbidden"),
            PlatformError::Auth { .. }
        ));
        assert!(matches!(
            PlatformError::from_status(404, "repo"),
            PlatformError::NotFound { .. }
        ));
        assert!(PlatformError::from_status(429, "slow down").is_rate_limited());
        assert!(matches!(
            PlatformError::from_status(503, "unavailable"),
            PlatformError::Server { status: 503, .. }
        ));
        assert!(matches!(
            PlatformError::from_status(400, "bad"),
            PlatformError::Api { status: 400, .. }
        ));
    }

    #[test]
    fn transient_classification() {
        assert!(PlatformError::from_status(502, "").is_transient());
        assert!(PlatformError::from_status(429, "").is_transient());
        assert!(PlatformError::network("reset").is_transient());
        assert!(PlatformError::Timeout { seconds: 30 }.is_transient());

        assert!(!PlatformError::from_status(401, "").is_transient());
        assert!(!PlatformError::from_status(404, "").is_transient());
        assert!(!PlatformError::config("no token").is_transient());
        assert!(
            !PlatformError::Decode {
                message: "eof".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn short_message_takes_first_line() {
        let err = PlatformError::network("connection reset\nbacktrace...");
        assert_eq!(
            short_error_message(&err),
            "Network error: connection reset"
        );
    }
}
