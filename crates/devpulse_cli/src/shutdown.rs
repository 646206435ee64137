use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};

use console::Term;
use tokio::sync::Notify;

/// Global shutdown flag for graceful termination.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

static SHUTDOWN_SIGNAL: LazyLock<Notify> = LazyLock::new(Notify::new);

/// Check if shutdown has been requested.
#[inline]
pub(crate) fn is_shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Acquire)
}

/// Request shutdown and wake everyone waiting for it.
fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::Release);
    SHUTDOWN_SIGNAL.notify_waiters();
}

/// Resolve once shutdown has been requested.
pub(crate) async fn wait_for_shutdown() {
    let notified = SHUTDOWN_SIGNAL.notified();
    if is_shutdown_requested() {
        return;
    }
    notified.await;
}

/// Set up the Ctrl+C handler for graceful shutdown.
///
/// The first Ctrl+C asks running work to wind down, the second exits
/// immediately with status 130.
pub(crate) fn setup_shutdown_handler() {
    tokio::spawn(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            return;
        }

        let is_tty = Term::stdout().is_term();
        if is_tty {
            eprintln!("\n\nShutdown requested, finishing current operations...");
            eprintln!("Press Ctrl+C again to force quit.");
        } else {
            tracing::warn!("Shutdown requested, finishing current operations");
        }

        request_shutdown();

        if tokio::signal::ctrl_c().await.is_ok() {
            if is_tty {
                eprintln!("Force quit!");
            }
            std::process::exit(130);
        }
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn wait_returns_after_request() {
        let waiter = tokio::spawn(wait_for_shutdown());
        tokio::task::yield_now().await;

        request_shutdown();
        assert!(is_shutdown_requested());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();

        // Already requested: returns immediately.
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown())
            .await
            .expect("should not block");
    }
}
