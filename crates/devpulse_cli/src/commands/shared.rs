use std::sync::Arc;
use std::time::Duration;

use devpulse::azure::AzureDevOpsClient;
use devpulse::platform::StaticCredentials;
use devpulse::{SyncRuntime, connect_and_migrate};

use crate::config::Config;
use crate::progress::{self, LoggingReporter};

/// Connect, apply pending migrations and wire the sync runtime.
///
/// The orchestrator enforces the effective per-request timeout; the reqwest
/// timeout only bounds the transport.
pub(crate) async fn build_runtime(
    config: &Config,
    database_url: &str,
) -> Result<SyncRuntime, Box<dyn std::error::Error>> {
    let db = Arc::new(connect_and_migrate(database_url).await?);
    let seed = config.scheduler_config();

    let client = AzureDevOpsClient::new(Duration::from_secs(u64::from(
        seed.request_timeout_seconds,
    )))?
    .with_api_version(config.azure.api_version.clone());

    let runtime = SyncRuntime::builder()
        .database(db)
        .source(Arc::new(client))
        .credentials(Arc::new(StaticCredentials::new(config.azure_token())))
        .config(seed)
        .progress(progress::as_callback(Arc::new(LoggingReporter::new())))
        .build()
        .await?;

    Ok(runtime)
}
