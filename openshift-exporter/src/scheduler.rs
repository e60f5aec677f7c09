//! Process lifetime: idle loop and shutdown signals.
//!
//! Collection happens inside the HTTP handler, so the loop here only keeps
//! the process alive until an interrupt or termination signal arrives.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, trace, warn};

/// Signal that ended the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

/// Idle loop that ticks until shutdown.
#[derive(Debug, Clone)]
pub struct IdleLoop {
    interval: Duration,
}

impl IdleLoop {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Tick until the shutdown flag is set. Returns the number of ticks.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut interval = tokio::time::interval(self.interval);
        let mut ticks = 0u64;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    ticks += 1;
                    trace!(ticks, "Idle");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        trace!(ticks, "Idle loop stopped");
        ticks
    }
}

/// Wait for Ctrl+C or SIGTERM.
pub async fn wait_for_signal() -> ShutdownSignal {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl+C");
            }
            info!("Received Ctrl+C, shutting down...");
            ShutdownSignal::Interrupt
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
            ShutdownSignal::Terminate
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
