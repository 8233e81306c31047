//! Momentum - work-session tracking core for a desktop time tracker
//!
//! Owns the session lifecycle, the randomized screenshot cadence, the idle
//! watchdog and power-event handling, organized around trait-based
//! dependency injection for testability.

pub mod commands;
#[cfg(feature = "desktop")]
pub mod desktop;
pub mod traits;
pub mod mocks;
pub mod production;

pub mod config;
pub mod credentials;
pub mod events;
pub mod idle_watchdog;
pub mod lifecycle;
pub mod power_monitor;
pub mod screenshot_scheduler;
pub mod session;
mod state;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use config::AppConfig;
pub use lifecycle::{SessionController, SessionError};
pub use power_monitor::{PowerAction, PowerEvent};
pub use session::{SessionState, WorkContext};
pub use state::AppState;

/// Initialize logging to both stderr and a daily file in `log_dir`.
///
/// The returned guard flushes the file writer; keep it alive for the
/// lifetime of the process.
pub fn init_logging(log_dir: &Path) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = rolling::daily(log_dir, "momentum.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "momentum=info,momentum_lib=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)) // terminal
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .try_init()?;

    Ok(guard)
}
