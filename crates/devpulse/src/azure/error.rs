//! Error types for Azure DevOps API operations.

use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::http::HttpError;
use crate::platform::PlatformError;

#[derive(Debug, Error)]
pub enum AzureError {
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-2xx response.
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<url::ParseError> for AzureError {
    fn from(err: url::ParseError) -> Self {
        AzureError::Config(format!("invalid base URL: {err}"))
    }
}

impl From<AzureError> for PlatformError {
    fn from(err: AzureError) -> Self {
        match err {
            AzureError::Http(HttpError::Timeout) => PlatformError::Timeout { seconds: 0 },
            AzureError::Http(e) => PlatformError::network(e.to_string()),
            AzureError::Json(e) => PlatformError::Decode {
                message: e.to_string(),
            },
            AzureError::Api {
                status: 429,
                retry_after,
                ..
            } => PlatformError::RateLimited {
                reset_at: Utc::now()
                    + retry_after
                        .and_then(|d| chrono::Duration::from_std(d).ok())
                        .unwrap_or_else(|| chrono::Duration::minutes(1)),
            },
            AzureError::Api {
                status, message, ..
            } => PlatformError::from_status(status, message),
            AzureError::Config(message) => PlatformError::config(message),
        }
    }
}
