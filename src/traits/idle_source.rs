//! System idle time trait

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum IdleError {
    #[error("Idle time unsupported on this platform")]
    Unsupported,
    #[error("Idle query failed: {0}")]
    QueryFailed(String),
}

/// Trait for reading how long the user has been away from keyboard and mouse
///
/// Production: IOKit HIDIdleTime on macOS
/// Testing: Scripted samples
#[cfg_attr(test, mockall::automock)]
pub trait IdleSource: Send + Sync {
    /// Seconds since the last user input
    fn idle_seconds(&self) -> Result<f64, IdleError>;
}
