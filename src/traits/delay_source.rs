//! Random delay trait for the screenshot scheduler

use std::time::Duration;

/// Source of inter-capture delays
///
/// Production: uniform whole minutes via `rand`
/// Testing: Fixed sequence
#[cfg_attr(test, mockall::automock)]
pub trait DelaySource: Send + Sync {
    /// Next delay, which must fall within `[min, max]`
    fn next_delay(&self, min: Duration, max: Duration) -> Duration;
}
