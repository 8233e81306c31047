//! Test doubles for dependency injection
//!
//! In-memory implementations of every external seam so the session core can
//! be exercised without network, display or a real idle clock.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;

use crate::traits::{
    ApiError, BeginSessionRequest, CaptureError, DelaySource, EndSessionRequest, IdleError,
    IdleSource, ScreenCapture, ScreenshotUpload, SessionApi,
};

/// Smallest valid PNG signature, enough to stand in for a screenshot
pub const FAKE_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

// ============================================================================
// RecordedSessionApi
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Begin { token: String, request: BeginSessionRequest },
    End { token: String, request: EndSessionRequest },
    Upload { token: String, upload: ScreenshotUpload },
}

/// Failure configuration for the session API
#[derive(Clone)]
pub enum ApiBehavior {
    /// Every call succeeds
    AlwaysSucceed,
    /// Fail the first N calls, then succeed
    FailThenSucceed { fail_count: usize, error: ApiError },
    /// Every call fails with the given error
    AlwaysFail(ApiError),
    /// Never resolve, like a server that accepted the connection and went quiet
    Hang,
    /// Begin-session takes this long, then succeeds; other calls succeed at once
    SlowBegin(Duration),
    /// End-session takes this long, then succeeds; other calls succeed at once
    SlowEnd(Duration),
    /// Custom response based on the call
    Custom(Arc<dyn Fn(&ApiCall) -> Result<(), ApiError> + Send + Sync>),
}

/// Recorded session API for testing
///
/// Records every call before responding according to its behavior.
#[derive(Clone)]
pub struct RecordedSessionApi {
    calls: Arc<Mutex<Vec<ApiCall>>>,
    behavior: Arc<Mutex<ApiBehavior>>,
}

impl RecordedSessionApi {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            behavior: Arc::new(Mutex::new(ApiBehavior::AlwaysSucceed)),
        }
    }

    pub fn success() -> Self {
        Self::new()
    }

    pub fn fail_then_succeed(fail_count: usize, error: ApiError) -> Self {
        let client = Self::new();
        client.set_behavior(ApiBehavior::FailThenSucceed { fail_count, error });
        client
    }

    pub fn always_fail(error: ApiError) -> Self {
        let client = Self::new();
        client.set_behavior(ApiBehavior::AlwaysFail(error));
        client
    }

    pub fn hanging() -> Self {
        let client = Self::new();
        client.set_behavior(ApiBehavior::Hang);
        client
    }

    /// Change the behavior for subsequent calls
    pub fn set_behavior(&self, behavior: ApiBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn begin_count(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, ApiCall::Begin { .. })).count()
    }

    pub fn end_count(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, ApiCall::End { .. })).count()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads().len()
    }

    /// Notes sent with every end-session call, in order
    pub fn end_notes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::End { request, .. } => Some(request.note),
                _ => None,
            })
            .collect()
    }

    pub fn uploads(&self) -> Vec<ScreenshotUpload> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::Upload { upload, .. } => Some(upload),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    async fn record_and_respond(&self, call: ApiCall) -> Result<(), ApiError> {
        let current_count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(call.clone());
            calls.len()
        };

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            ApiBehavior::AlwaysSucceed => Ok(()),
            ApiBehavior::FailThenSucceed { fail_count, error } => {
                if current_count <= fail_count {
                    Err(error)
                } else {
                    Ok(())
                }
            }
            ApiBehavior::AlwaysFail(error) => Err(error),
            ApiBehavior::Hang => std::future::pending().await,
            ApiBehavior::SlowBegin(delay) => {
                if matches!(call, ApiCall::Begin { .. }) {
                    tokio::time::sleep(delay).await;
                }
                Ok(())
            }
            ApiBehavior::SlowEnd(delay) => {
                if matches!(call, ApiCall::End { .. }) {
                    tokio::time::sleep(delay).await;
                }
                Ok(())
            }
            ApiBehavior::Custom(func) => func(&call),
        }
    }
}

impl Default for RecordedSessionApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionApi for RecordedSessionApi {
    async fn begin_session(&self, token: &str, request: &BeginSessionRequest) -> Result<(), ApiError> {
        self.record_and_respond(ApiCall::Begin {
            token: token.to_string(),
            request: request.clone(),
        })
        .await
    }

    async fn end_session(&self, token: &str, request: &EndSessionRequest) -> Result<(), ApiError> {
        self.record_and_respond(ApiCall::End {
            token: token.to_string(),
            request: request.clone(),
        })
        .await
    }

    async fn upload_screenshot(&self, token: &str, upload: ScreenshotUpload) -> Result<(), ApiError> {
        self.record_and_respond(ApiCall::Upload {
            token: token.to_string(),
            upload,
        })
        .await
    }
}

// ============================================================================
// FakeScreenCapture
// ============================================================================

/// Screen capture that writes `FAKE_PNG`, or fails every time
#[derive(Clone, Default)]
pub struct FakeScreenCapture {
    failure: Option<CaptureError>,
    captures: Arc<AtomicUsize>,
}

impl FakeScreenCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: CaptureError) -> Self {
        Self {
            failure: Some(error),
            captures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of capture attempts, failed ones included
    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScreenCapture for FakeScreenCapture {
    async fn capture_to(&self, path: &Path) -> Result<(), CaptureError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        std::fs::write(path, FAKE_PNG).map_err(|e| CaptureError::WriteFailed(e.to_string()))
    }
}

// ============================================================================
// ScriptedIdleSource
// ============================================================================

/// Idle source whose reading the test sets directly
#[derive(Clone)]
pub struct ScriptedIdleSource {
    seconds: Arc<Mutex<Result<f64, IdleError>>>,
    samples: Arc<AtomicUsize>,
}

impl ScriptedIdleSource {
    pub fn constant(seconds: f64) -> Self {
        Self {
            seconds: Arc::new(Mutex::new(Ok(seconds))),
            samples: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active() -> Self {
        Self::constant(0.0)
    }

    pub fn unavailable() -> Self {
        Self {
            seconds: Arc::new(Mutex::new(Err(IdleError::Unsupported))),
            samples: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set(&self, seconds: f64) {
        *self.seconds.lock().unwrap() = Ok(seconds);
    }

    pub fn sample_count(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }
}

impl IdleSource for ScriptedIdleSource {
    fn idle_seconds(&self) -> Result<f64, IdleError> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        self.seconds.lock().unwrap().clone()
    }
}

// ============================================================================
// FixedDelays
// ============================================================================

/// Delay source cycling through a fixed sequence
pub struct FixedDelays {
    sequence: Vec<Duration>,
    next: AtomicUsize,
}

impl FixedDelays {
    pub fn new(sequence: Vec<Duration>) -> Self {
        Self {
            sequence,
            next: AtomicUsize::new(0),
        }
    }

    pub fn minutes(minutes: &[u64]) -> Self {
        Self::new(minutes.iter().map(|m| Duration::from_secs(m * 60)).collect())
    }
}

impl DelaySource for FixedDelays {
    fn next_delay(&self, min: Duration, _max: Duration) -> Duration {
        if self.sequence.is_empty() {
            return min;
        }
        let index = self.next.fetch_add(1, Ordering::SeqCst) % self.sequence.len();
        self.sequence[index]
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_api_records_calls() {
        let api = RecordedSessionApi::success();

        api.begin_session("tok", &BeginSessionRequest::default()).await.unwrap();
        api.end_session("tok", &EndSessionRequest { note: "bye".into() }).await.unwrap();

        assert_eq!(api.begin_count(), 1);
        assert_eq!(api.end_notes(), vec!["bye".to_string()]);
    }

    #[tokio::test]
    async fn test_session_api_fail_then_succeed() {
        let api = RecordedSessionApi::fail_then_succeed(1, ApiError::NetworkError("refused".into()));

        assert!(api.end_session("tok", &EndSessionRequest::default()).await.is_err());
        assert!(api.end_session("tok", &EndSessionRequest::default()).await.is_ok());
        assert_eq!(api.end_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_api_hang_never_resolves() {
        let api = RecordedSessionApi::hanging();
        let result = tokio::time::timeout(
            Duration::from_secs(30),
            api.end_session("tok", &EndSessionRequest::default()),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(api.end_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_api_slow_end_only_delays_end() {
        let api = RecordedSessionApi::success();
        api.set_behavior(ApiBehavior::SlowEnd(Duration::from_secs(2)));

        let started = tokio::time::Instant::now();
        api.begin_session("tok", &BeginSessionRequest::default()).await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);

        api.end_session("tok", &EndSessionRequest::default()).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[test]
    fn test_fixed_delays_cycle() {
        let delays = FixedDelays::minutes(&[5, 9]);
        let (min, max) = (Duration::from_secs(300), Duration::from_secs(600));
        assert_eq!(delays.next_delay(min, max), Duration::from_secs(300));
        assert_eq!(delays.next_delay(min, max), Duration::from_secs(540));
        assert_eq!(delays.next_delay(min, max), Duration::from_secs(300));
    }

    #[test]
    fn test_scripted_idle_source() {
        let idle = ScriptedIdleSource::active();
        assert_eq!(idle.idle_seconds().unwrap(), 0.0);
        idle.set(601.0);
        assert_eq!(idle.idle_seconds().unwrap(), 601.0);
        assert_eq!(idle.sample_count(), 2);
        assert!(ScriptedIdleSource::unavailable().idle_seconds().is_err());
    }
}
