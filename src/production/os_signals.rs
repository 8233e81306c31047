//! OS signal forwarding into power events
//!
//! Ctrl-C (SIGINT) is a quit request and may arrive more than once. SIGTERM
//! is treated as system shutdown on Unix.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::power_monitor::PowerEvent;

/// Install handlers and forward every signal as a [`PowerEvent`].
///
/// The task ends when the receiving side is dropped.
pub fn spawn_signal_forwarder(tx: mpsc::Sender<PowerEvent>) -> std::io::Result<JoinHandle<()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        Ok(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    Some(()) = sigterm.recv() => PowerEvent::Shutdown,
                    Some(()) = sigint.recv() => PowerEvent::QuitRequested,
                    else => break,
                };
                tracing::info!(event = ?event, "OS signal received");
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        }))
    }

    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                    break;
                }
                tracing::info!("Ctrl-C received");
                if tx.send(PowerEvent::QuitRequested).await.is_err() {
                    break;
                }
            }
        }))
    }
}
