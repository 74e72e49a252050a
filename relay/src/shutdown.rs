//! Process shutdown plumbing.
//!
//! A `watch::Sender<bool>` owned by `main` flips to `true` on SIGINT/SIGTERM;
//! every long-running loop selects on [`stopped`].

use std::io;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Resolves once shutdown was requested or the sender is gone.
pub async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Wait for SIGINT or SIGTERM.
///
/// Fails if no signal listener could be installed; the relay could then never
/// be stopped cleanly, so callers treat it as fatal.
pub async fn signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                return tokio::select! {
                    result = tokio::signal::ctrl_c() => received("SIGINT", result),
                    _ = term.recv() => received("SIGTERM", Ok(())),
                };
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    received("SIGINT", tokio::signal::ctrl_c().await)
}

fn received(name: &'static str, result: io::Result<()>) -> io::Result<()> {
    match result {
        Ok(()) => {
            info!(signal = name, "Received shutdown signal");
            Ok(())
        }
        Err(e) => {
            error!(signal = name, error = %e, "Failed to listen for shutdown signal");
            Err(e)
        }
    }
}
