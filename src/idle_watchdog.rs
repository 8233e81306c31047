//! Idle watchdog: polls system idle time and raises one timeout per run
//!
//! Each `start` opens a new generation. A run that sees idle time at or past
//! the threshold sends a single [`IdleTimeout`] tagged with its generation and
//! exits; it never restarts itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::traits::IdleSource;

/// Raised when idle time crossed the threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleTimeout {
    pub generation: u64,
    pub idle_secs: f64,
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct IdleWatchdog {
    source: Arc<dyn IdleSource>,
    threshold: Duration,
    poll_interval: Duration,
    signal: mpsc::UnboundedSender<IdleTimeout>,
    generation: Arc<AtomicU64>,
    running: Mutex<Option<RunningLoop>>,
}

impl IdleWatchdog {
    pub fn new(
        source: Arc<dyn IdleSource>,
        threshold: Duration,
        poll_interval: Duration,
        signal: mpsc::UnboundedSender<IdleTimeout>,
    ) -> Self {
        Self {
            source,
            threshold,
            poll_interval,
            signal,
            generation: Arc::new(AtomicU64::new(0)),
            running: Mutex::new(None),
        }
    }

    /// Start polling, cancelling any poll loop that is still running
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap();
        if let Some(previous) = running.take() {
            previous.cancel.cancel();
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            self.source.clone(),
            self.threshold,
            self.poll_interval,
            self.signal.clone(),
            generation,
            cancel.clone(),
        ));
        *running = Some(RunningLoop { cancel, handle });

        tracing::info!(
            generation,
            threshold_secs = self.threshold.as_secs(),
            "Idle watchdog started"
        );
    }

    pub fn stop(&self) {
        // Invalidate any timeout already queued by the old run
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = self.running.lock().unwrap().take() {
            previous.cancel.cancel();
            tracing::info!("Idle watchdog stopped");
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

    /// Whether a timeout belongs to the run that is current right now
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

impl Drop for IdleWatchdog {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.lock() {
            if let Some(previous) = running.take() {
                previous.cancel.cancel();
            }
        }
    }
}

async fn poll_loop(
    source: Arc<dyn IdleSource>,
    threshold: Duration,
    poll_interval: Duration,
    signal: mpsc::UnboundedSender<IdleTimeout>,
    generation: u64,
    cancel: CancellationToken,
) {
    let start = tokio::time::Instant::now() + poll_interval;
    let mut interval = tokio::time::interval_at(start, poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        let idle_secs = match source.idle_seconds() {
            Ok(seconds) => seconds,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read idle time");
                continue;
            }
        };
        tracing::trace!(idle_secs, "System idle time");

        if idle_secs >= threshold.as_secs_f64() {
            tracing::info!(idle_secs, generation, "Idle threshold reached");
            if signal.send(IdleTimeout { generation, idle_secs }).is_err() {
                tracing::debug!("Idle timeout receiver gone");
            }
            return;
        }
    }
}
