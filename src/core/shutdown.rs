//! # OS signal wiring.
//!
//! [`listen`] spawns the infrastructure task `Shiva.signals`, which calls
//! [`Daemon::stop`] on the first termination signal.
//!
//! **Unix:** `SIGINT`, `SIGHUP`, `SIGTERM`.
//! **Elsewhere:** Ctrl-C via [`tokio::signal::ctrl_c`].
//!
//! If the listeners cannot be registered a warning is logged and the daemon
//! keeps running; a programmatic `stop()` still works.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::warn;

use super::daemon::Daemon;

/// Task identity of the signal listener.
pub const SIGNALS_IDENTITY: &str = "Shiva.signals";

/// Spawns the signal listener for `daemon`.
pub fn listen(daemon: &Arc<Daemon>) -> JoinHandle<Option<()>> {
    let d = Arc::clone(daemon);
    daemon.spawn_infrastructure(SIGNALS_IDENTITY, async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => d.stop(),
            Err(e) => warn!(error = %e, "signal handlers unavailable, use stop() to shut down"),
        }
    })
}

/// Waits for a termination signal.
///
/// Returns `Err` if signal registration fails.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sighup.recv()  => {},
        _ = sigterm.recv() => {},
    }
    Ok(())
}

/// Waits for a termination signal.
///
/// Returns `Err` if signal registration fails.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
