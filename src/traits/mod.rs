//! Trait definitions for dependency injection
//!
//! Network, screen, idle clock and randomness sit behind traits so the
//! session core can be driven deterministically in tests.

mod delay_source;
mod idle_source;
mod screen_capture;
mod session_api;

pub use delay_source::DelaySource;
pub use idle_source::{IdleError, IdleSource};
pub use screen_capture::{CaptureError, ScreenCapture};
pub use session_api::{
    ApiError, BeginSessionRequest, EndSessionRequest, ScreenshotUpload, SessionApi,
};

#[cfg(test)]
pub use delay_source::MockDelaySource;
#[cfg(test)]
pub use idle_source::MockIdleSource;
#[cfg(test)]
pub use screen_capture::MockScreenCapture;
#[cfg(test)]
pub use session_api::MockSessionApi;
