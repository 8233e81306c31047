//! Production implementations of traits

mod idle_source;
#[cfg(target_os = "macos")]
mod iokit_idle;
mod random_delay;
mod screen_capture;
mod session_api;
pub mod os_signals;

pub use idle_source::SystemIdleSource;
pub use random_delay::UniformMinuteDelay;
pub use screen_capture::PrimaryScreenCapture;
pub use session_api::{extract_message, ReqwestSessionApi};
