//! Screen capture trait

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("No display available")]
    NoDisplay,
    #[error("Screen capture unsupported on this platform")]
    Unsupported,
    #[error("Capture failed: {0}")]
    Backend(String),
    #[error("Failed to write screenshot: {0}")]
    WriteFailed(String),
}

/// Trait for grabbing the full screen into a PNG file
///
/// Production: `screenshots` crate (primary display)
/// Testing: Writes a fixed byte payload or fails on demand
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ScreenCapture: Send + Sync {
    /// Capture the screen and write a PNG to `path`
    async fn capture_to(&self, path: &Path) -> Result<(), CaptureError>;
}
