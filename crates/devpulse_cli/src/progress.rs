//! Progress reporting for sync operations.
//!
//! Sync and batch events are mapped to structured tracing output, so the
//! same reporter serves the interactive commands and the `run` daemon.

mod logging;

use std::sync::Arc;

use devpulse::sync::ProgressCallback;

pub use logging::LoggingReporter;

/// Convert a reporter to a ProgressCallback for the library.
pub fn as_callback(reporter: Arc<LoggingReporter>) -> Arc<ProgressCallback> {
    Arc::new(Box::new(move |event| {
        reporter.handle(event);
    }))
}
