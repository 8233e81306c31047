//! Full-screen capture backed by the `screenshots` crate
//!
//! Only Windows and macOS have a backend; elsewhere every capture reports
//! `CaptureError::Unsupported` and the scheduler keeps its cadence.

use std::path::{Path, PathBuf};
use crate::traits::{CaptureError, ScreenCapture};

pub struct PrimaryScreenCapture;

impl PrimaryScreenCapture {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PrimaryScreenCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(windows, target_os = "macos"))]
fn capture_blocking(path: &Path) -> Result<(), CaptureError> {
    use screenshots::Screen;

    let screens = Screen::all()
        .map_err(|e| CaptureError::Backend(format!("screen enumeration failed: {e}")))?;
    let screen = screens
        .iter()
        .find(|s| s.display_info.is_primary)
        .or_else(|| screens.first())
        .ok_or(CaptureError::NoDisplay)?;

    let image = screen
        .capture()
        .map_err(|e| CaptureError::Backend(e.to_string()))?;
    image
        .save(path)
        .map_err(|e| CaptureError::WriteFailed(e.to_string()))?;
    Ok(())
}

#[cfg(not(any(windows, target_os = "macos")))]
fn capture_blocking(_path: &Path) -> Result<(), CaptureError> {
    Err(CaptureError::Unsupported)
}

#[async_trait::async_trait]
impl ScreenCapture for PrimaryScreenCapture {
    async fn capture_to(&self, path: &Path) -> Result<(), CaptureError> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || capture_blocking(&path))
            .await
            .map_err(|e| CaptureError::Backend(format!("capture task failed: {e}")))?
    }
}
