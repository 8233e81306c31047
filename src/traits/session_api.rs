//! Remote session API trait for the work-tracking backend

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("HTTP {status}: {message}")]
    HttpError { status: u16, message: String },
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Timeout")]
    Timeout,
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Local file error: {0}")]
    FileError(String),
}

impl ApiError {
    /// Whether re-issuing the same request could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::NetworkError(_) => true,
            ApiError::HttpError { status, .. } => *status >= 500 || *status == 429,
            ApiError::Timeout => true,
            ApiError::Rejected(_) => false,
            ApiError::InvalidUrl(_) => false,
            ApiError::FileError(_) => false,
        }
    }
}

/// Body of the begin-session call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginSessionRequest {
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    #[serde(default)]
    pub note: String,
}

/// Body of the end-session call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndSessionRequest {
    #[serde(default)]
    pub note: String,
}

/// A screenshot ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotUpload {
    pub file_name: String,
    pub png: Vec<u8>,
}

/// Trait for the three calls the session core makes against the backend
///
/// Production: reqwest HTTP client
/// Testing: Recorded calls with scripted outcomes
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SessionApi: Send + Sync {
    /// Tell the server a work session started
    async fn begin_session(&self, token: &str, request: &BeginSessionRequest) -> Result<(), ApiError>;

    /// Tell the server the current work session ended
    async fn end_session(&self, token: &str, request: &EndSessionRequest) -> Result<(), ApiError>;

    /// Upload one PNG screenshot for the active session
    async fn upload_screenshot(&self, token: &str, upload: ScreenshotUpload) -> Result<(), ApiError>;
}
