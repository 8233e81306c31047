//! Reqwest-based session API client

use std::time::{Duration, Instant};
use reqwest::{Client, Url};
use crate::traits::{ApiError, BeginSessionRequest, EndSessionRequest, ScreenshotUpload, SessionApi};

const TIMEOUT_SECONDS: u64 = 25;

const BEGIN_SESSION_PATH: &str = "start-work";
const END_SESSION_PATH: &str = "end-work";
// Spelling matches the server route.
const UPLOAD_SCREENSHOT_PATH: &str = "work-screenshort-upload";

pub struct ReqwestSessionApi {
    client: Client,
    base_url: Url,
}

impl ReqwestSessionApi {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        // Url::join drops the last segment unless the base ends with a slash
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECONDS))
            .build()
            .map_err(|e| ApiError::NetworkError(e.to_string()))?;

        tracing::debug!(base_url = %base_url, "Initialized session API client with {}s timeout", TIMEOUT_SECONDS);
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(e.to_string()))
    }

    async fn dispatch(&self, path: &str, request: reqwest::RequestBuilder) -> Result<(), ApiError> {
        let start = Instant::now();

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                tracing::warn!(path = %path, "Session API timeout");
                ApiError::Timeout
            } else {
                tracing::warn!(path = %path, error = %e, "Session API network error");
                ApiError::NetworkError(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::info!(
            path = %path,
            status = status.as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Session API response"
        );

        if !status.is_success() {
            let message = extract_message(&body)
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_else(|| "API request failed".to_string());
            return Err(ApiError::HttpError {
                status: status.as_u16(),
                message,
            });
        }

        if reports_failure(&body) {
            let message = extract_message(&body)
                .unwrap_or_else(|| "API request returned an error".to_string());
            return Err(ApiError::Rejected(message));
        }

        Ok(())
    }
}

/// Human-readable message from a JSON error body (`message`, then `error`)
pub fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

/// Whether a 2xx body still carries `"success": false`
fn reports_failure(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("success").and_then(|s| s.as_bool()))
        == Some(false)
}

#[async_trait::async_trait]
impl SessionApi for ReqwestSessionApi {
    async fn begin_session(&self, token: &str, request: &BeginSessionRequest) -> Result<(), ApiError> {
        tracing::info!(
            project_id = ?request.project_id,
            task_id = ?request.task_id,
            "Sending begin-session"
        );
        let url = self.endpoint(BEGIN_SESSION_PATH)?;
        let builder = self.client.post(url).bearer_auth(token).json(request);
        self.dispatch(BEGIN_SESSION_PATH, builder).await
    }

    async fn end_session(&self, token: &str, request: &EndSessionRequest) -> Result<(), ApiError> {
        tracing::info!("Sending end-session");
        let url = self.endpoint(END_SESSION_PATH)?;
        let builder = self.client.post(url).bearer_auth(token).json(request);
        self.dispatch(END_SESSION_PATH, builder).await
    }

    async fn upload_screenshot(&self, token: &str, upload: ScreenshotUpload) -> Result<(), ApiError> {
        tracing::info!(file = %upload.file_name, bytes = upload.png.len(), "Uploading screenshot");
        let url = self.endpoint(UPLOAD_SCREENSHOT_PATH)?;

        let part = reqwest::multipart::Part::bytes(upload.png)
            .file_name(upload.file_name)
            .mime_str("image/png")
            .map_err(|e| ApiError::FileError(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("image", part);

        let builder = self.client.post(url).bearer_auth(token).multipart(form);
        self.dispatch(UPLOAD_SCREENSHOT_PATH, builder).await
    }
}
