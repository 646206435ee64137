//! Configuration file support for devpulse.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. Environment variables (prefixed with `DEVPULSE_`, e.g., `DEVPULSE_DATABASE_URL`)
//! 2. Local config file (./devpulse.toml)
//! 3. XDG config file (~/.config/devpulse/config.toml)
//! 4. Built-in defaults
//!
//! The scheduler section only seeds the database: once `devpulse config set`
//! has persisted a configuration, the stored copy wins.
//!
//! Example config file:
//! ```toml
//! [database]
//! url = "sqlite://~/.local/state/devpulse/devpulse.db"  # optional, this is the default
//!
//! [azure]
//! base_url = "https://dev.azure.com"
//! token = "..."  # or use DEVPULSE_AZURE_TOKEN env var
//! api_version = "7.1"
//! request_timeout_seconds = 30
//!
//! [scheduler]
//! interval_minutes = 60
//! max_concurrent_repos = 3
//! notification_enabled = true
//! notification_recipients = ["ops@example.com"]
//!
//! [sync]
//! page_size = 100
//! lease_ttl_minutes = 30
//! ```

use std::path::PathBuf;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use devpulse::SchedulerConfig;
use devpulse::azure::{AZURE_DEVOPS_HOST, DEFAULT_API_VERSION};
use directories::ProjectDirs;
use secrecy::SecretString;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Azure DevOps configuration.
    pub azure: AzureConfig,
    /// Initial scheduler configuration.
    pub scheduler: SchedulerConfig,
    /// Per-job sync overrides.
    pub sync: SyncConfig,
}

/// Database configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL.
    /// Supports sqlite:// and postgres:// schemes.
    /// Defaults to `sqlite://~/.local/state/devpulse/devpulse.db` if not specified.
    pub url: Option<String>,
}

/// Azure DevOps configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    /// Organization host used when registering repositories.
    pub base_url: String,
    /// Personal access token for repositories without a stored credential.
    /// Can also be set via DEVPULSE_AZURE_TOKEN environment variable.
    pub token: Option<String>,
    pub api_version: String,
    /// Overrides `scheduler.request_timeout_seconds` when set.
    pub request_timeout_seconds: Option<u32>,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            base_url: AZURE_DEVOPS_HOST.to_string(),
            token: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            request_timeout_seconds: None,
        }
    }
}

/// Sync overrides applied on top of the scheduler section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub page_size: Option<u32>,
    pub lease_ttl_minutes: Option<u32>,
    pub rate_limit_max_wait_seconds: Option<u32>,
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/devpulse/config.toml)
    /// 3. Local config file (./devpulse.toml)
    /// 4. Environment variables with DEVPULSE_ prefix
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(config_path) = Self::default_config_path()
            && config_path.exists()
        {
            tracing::debug!("Loading config from {:?}", config_path);
            builder = builder.add_source(
                File::from(config_path)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        let local_config = PathBuf::from("devpulse.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./devpulse.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // e.g., DEVPULSE_DATABASE_URL -> database.url, DEVPULSE_AZURE_TOKEN -> azure.token
        builder = builder.add_source(
            Environment::with_prefix("DEVPULSE")
                .separator("_")
                .try_parsing(true),
        );

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        }
    }

    /// Get the database URL, falling back to the default state directory path.
    ///
    /// The `mode=rwc` parameter creates the SQLite file if it doesn't exist.
    pub fn database_url(&self) -> Option<String> {
        self.database.url.clone().or_else(|| {
            Self::default_state_dir().map(|state_dir| {
                let db_path = state_dir.join("devpulse.db");
                format!("sqlite://{}?mode=rwc", db_path.display())
            })
        })
    }

    /// The fallback Azure DevOps token, if one is configured.
    pub fn azure_token(&self) -> Option<SecretString> {
        self.azure
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| SecretString::from(t.to_string()))
    }

    /// Scheduler configuration with the `[sync]` and `[azure]` overrides applied.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let mut config = self.scheduler.clone();
        if let Some(page_size) = self.sync.page_size {
            config.page_size = page_size;
        }
        if let Some(ttl) = self.sync.lease_ttl_minutes {
            config.lease_ttl_minutes = ttl;
        }
        if let Some(wait) = self.sync.rate_limit_max_wait_seconds {
            config.rate_limit_max_wait_seconds = wait;
        }
        if let Some(timeout) = self.azure.request_timeout_seconds {
            config.request_timeout_seconds = timeout;
        }
        config
    }

    /// Get the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "devpulse").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the default state directory path.
    ///
    /// On Linux, this is `$XDG_STATE_HOME/devpulse` or `~/.local/state/devpulse`.
    /// On macOS/Windows, falls back to the data directory.
    pub fn default_state_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "devpulse").map(|dirs| {
            dirs.state_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| dirs.data_dir().to_path_buf())
        })
    }
}
