//! Platform idle-time source

use crate::traits::{IdleError, IdleSource};

pub struct SystemIdleSource;

impl SystemIdleSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemIdleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleSource for SystemIdleSource {
    #[cfg(target_os = "macos")]
    fn idle_seconds(&self) -> Result<f64, IdleError> {
        super::iokit_idle::get_idle_seconds()
    }

    #[cfg(not(target_os = "macos"))]
    fn idle_seconds(&self) -> Result<f64, IdleError> {
        Err(IdleError::Unsupported)
    }
}
