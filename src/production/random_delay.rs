//! Uniform random screenshot delays

use std::time::Duration;
use rand::Rng;
use crate::traits::DelaySource;

/// Picks a whole number of minutes uniformly in `[min, max]`
///
/// Bounds that are not whole minutes, or span less than a minute, fall back
/// to uniform whole seconds.
pub struct UniformMinuteDelay;

impl UniformMinuteDelay {
    pub fn new() -> Self {
        Self
    }
}

impl Default for UniformMinuteDelay {
    fn default() -> Self {
        Self::new()
    }
}

impl DelaySource for UniformMinuteDelay {
    fn next_delay(&self, min: Duration, max: Duration) -> Duration {
        let (lo, hi) = (min.as_secs(), max.as_secs().max(min.as_secs()));
        let mut rng = rand::thread_rng();

        if lo % 60 == 0 && hi % 60 == 0 && hi > lo {
            let minutes = rng.gen_range(lo / 60..=hi / 60);
            Duration::from_secs(minutes * 60)
        } else {
            Duration::from_secs(rng.gen_range(lo..=hi))
        }
    }
}
