//! Graceful shutdown signal handling for watch mode.

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;

/// Shutdown state shared by the watch loop.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Whether a shutdown signal has arrived.
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once a shutdown signal has arrived.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Register OS signal handlers.
///
/// On SIGTERM or SIGINT (Ctrl+C), the returned [`Shutdown`] is triggered.
pub fn setup_signal_handlers() -> Result<Shutdown> {
    let (tx, rx) = watch::channel(false);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("received SIGINT (Ctrl+C), initiating shutdown");
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, initiating shutdown");
                }
            }
            let _ = tx.send(true);
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl+C, initiating shutdown");
            }
            let _ = tx.send(true);
        });
    }

    Ok(Shutdown { rx })
}
