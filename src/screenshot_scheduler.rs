//! Randomized background screenshot capture
//!
//! While a session is Active one loop sleeps for a random delay, captures the
//! screen to a scratch file, uploads it and deletes the file, then draws the
//! next delay. Stopping cancels the pending sleep only: a capture that has
//! already fired runs to completion, and no further capture is scheduled.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::credentials::CredentialHolder;
use crate::traits::{DelaySource, ScreenCapture, ScreenshotUpload, SessionApi};

const FILE_PREFIX: &str = "screenshot-";
const FILE_EXTENSION: &str = "png";

/// What happened to one scheduled capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Uploaded,
    UploadFailed,
    CaptureFailed,
    SkippedNoCredential,
}

/// Everything a capture needs, shared with the spawned loop
struct CaptureJob {
    capture: Arc<dyn ScreenCapture>,
    api: Arc<dyn SessionApi>,
    credentials: Arc<CredentialHolder>,
    delays: Arc<dyn DelaySource>,
    min_delay: Duration,
    max_delay: Duration,
    scratch_dir: PathBuf,
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ScreenshotScheduler {
    job: Arc<CaptureJob>,
    running: Mutex<Option<RunningLoop>>,
}

impl ScreenshotScheduler {
    pub fn new(
        capture: Arc<dyn ScreenCapture>,
        api: Arc<dyn SessionApi>,
        credentials: Arc<CredentialHolder>,
        delays: Arc<dyn DelaySource>,
        window: (Duration, Duration),
        scratch_dir: PathBuf,
    ) -> Self {
        let (min_delay, max_delay) = window;
        Self {
            job: Arc::new(CaptureJob {
                capture,
                api,
                credentials,
                delays,
                min_delay,
                max_delay: max_delay.max(min_delay),
                scratch_dir,
            }),
            running: Mutex::new(None),
        }
    }

    /// Start the capture loop, replacing any loop already running
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap();
        if let Some(previous) = running.take() {
            previous.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(capture_loop(self.job.clone(), cancel.clone()));
        *running = Some(RunningLoop { cancel, handle });

        tracing::info!(
            min_secs = self.job.min_delay.as_secs(),
            max_secs = self.job.max_delay.as_secs(),
            "Screenshot scheduler started"
        );
    }

    /// Cancel the pending capture; an in-flight one is left to finish
    pub fn stop(&self) {
        if let Some(previous) = self.running.lock().unwrap().take() {
            previous.cancel.cancel();
            tracing::info!("Screenshot scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap()
            .as_ref()
            .map(|r| !r.cancel.is_cancelled() && !r.handle.is_finished())
            .unwrap_or(false)
    }

    /// Capture and upload one screenshot right now
    pub async fn capture_now(&self) -> CaptureOutcome {
        self.job.capture_once().await
    }

    /// Delete screenshot files left behind by a previous run
    pub async fn sweep_scratch_dir(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.job.scratch_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(error = %e, "Screenshot scratch dir not readable");
                return 0;
            }
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if is_scratch_file(&path) && remove_scratch(&path).await {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::warn!(removed, "Removed leftover screenshots from a previous run");
        }
        removed
    }
}

impl Drop for ScreenshotScheduler {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.lock() {
            if let Some(previous) = running.take() {
                previous.cancel.cancel();
            }
        }
    }
}

async fn capture_loop(job: Arc<CaptureJob>, cancel: CancellationToken) {
    loop {
        let delay = job.next_delay();
        tracing::info!(
            "Scheduling next screenshot in {:.2} minutes",
            delay.as_secs_f64() / 60.0
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        let outcome = job.capture_once().await;
        tracing::debug!(outcome = ?outcome, "Scheduled capture finished");
    }
    tracing::debug!("Screenshot loop exited");
}

impl CaptureJob {
    fn next_delay(&self) -> Duration {
        self.delays
            .next_delay(self.min_delay, self.max_delay)
            .clamp(self.min_delay, self.max_delay)
    }

    fn scratch_path(&self) -> PathBuf {
        let stamp = chrono::Utc::now().timestamp_millis();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        self.scratch_dir
            .join(format!("{FILE_PREFIX}{stamp}-{}.{FILE_EXTENSION}", &suffix[..8]))
    }

    async fn capture_once(&self) -> CaptureOutcome {
        if let Err(e) = tokio::fs::create_dir_all(&self.scratch_dir).await {
            tracing::warn!(error = %e, dir = %self.scratch_dir.display(), "Cannot create screenshot dir");
        }
        let path = self.scratch_path();

        if let Err(e) = self.capture.capture_to(&path).await {
            tracing::warn!(error = %e, "Screen capture failed");
            remove_scratch(&path).await;
            return CaptureOutcome::CaptureFailed;
        }

        let outcome = self.upload(&path).await;
        remove_scratch(&path).await;
        outcome
    }

    async fn upload(&self, path: &Path) -> CaptureOutcome {
        let Some(token) = self.credentials.current() else {
            tracing::info!("No credential, screenshot not uploaded");
            return CaptureOutcome::SkippedNoCredential;
        };

        let png = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "Captured screenshot unreadable");
                return CaptureOutcome::CaptureFailed;
            }
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("screenshot.{FILE_EXTENSION}"));

        match self.api.upload_screenshot(&token, ScreenshotUpload { file_name, png }).await {
            Ok(()) => {
                tracing::info!("Screenshot uploaded");
                CaptureOutcome::Uploaded
            }
            Err(e) => {
                tracing::error!(error = %e, "Screenshot upload error");
                CaptureOutcome::UploadFailed
            }
        }
    }
}

fn is_scratch_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.starts_with(FILE_PREFIX)
        && path.extension().and_then(|e| e.to_str()) == Some(FILE_EXTENSION)
}

/// Remove a scratch file; a missing file is not an error
async fn remove_scratch(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "Failed to delete screenshot");
            false
        }
    }
}
