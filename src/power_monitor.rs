//! Power-state monitor
//!
//! Turns OS and host signals into forced session ends. Suspend keeps the
//! process alive; shutdown and quit end the session and then let it exit.
//! The first quit request is intercepted exactly once via [`QuitLatch`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::credentials::CredentialHolder;
use crate::lifecycle::{EndCause, ForcedEndOutcome, SessionController};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    Suspend,
    Shutdown,
    QuitRequested,
}

/// What the host should do after an event was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Continue,
    Exit,
}

/// One-shot latch for quit interception
#[derive(Debug, Default)]
pub struct QuitLatch {
    tripped: AtomicBool,
}

impl QuitLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true only for the first caller
    pub fn trip(&self) -> bool {
        !self.tripped.swap(true, Ordering::SeqCst)
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }
}

pub struct PowerMonitor {
    controller: Arc<SessionController>,
    credentials: Arc<CredentialHolder>,
    quit_latch: QuitLatch,
}

impl PowerMonitor {
    pub fn new(controller: Arc<SessionController>, credentials: Arc<CredentialHolder>) -> Self {
        Self {
            controller,
            credentials,
            quit_latch: QuitLatch::new(),
        }
    }

    pub fn quit_latch(&self) -> &QuitLatch {
        &self.quit_latch
    }

    pub async fn handle(&self, event: PowerEvent) -> PowerAction {
        tracing::info!(event = ?event, "Power event");
        match event {
            PowerEvent::Suspend => {
                self.end_if_logged_in(EndCause::Suspend).await;
                PowerAction::Continue
            }
            PowerEvent::Shutdown => {
                // A later quit during teardown must not end again
                self.quit_latch.trip();
                self.end_if_logged_in(EndCause::Shutdown).await;
                PowerAction::Exit
            }
            PowerEvent::QuitRequested => {
                if !self.intercept_quit() {
                    tracing::debug!("Quit already intercepted, passing through");
                    return PowerAction::Exit;
                }
                self.end_for_quit().await;
                PowerAction::Exit
            }
        }
    }

    /// Claim the quit interception. True only for the first request; the
    /// caller then owes an [`end_for_quit`](Self::end_for_quit) before exiting.
    pub fn intercept_quit(&self) -> bool {
        self.quit_latch.trip()
    }

    pub async fn end_for_quit(&self) -> ForcedEndOutcome {
        let outcome = self.controller.force_end(EndCause::Quit).await;
        tracing::info!(outcome = ?outcome, "Session closed before quit");
        outcome
    }

    /// Handle events until the channel closes or one of them asks to exit
    pub async fn run(&self, mut rx: mpsc::Receiver<PowerEvent>) -> PowerAction {
        while let Some(event) = rx.recv().await {
            if self.handle(event).await == PowerAction::Exit {
                return PowerAction::Exit;
            }
        }
        PowerAction::Continue
    }

    async fn end_if_logged_in(&self, cause: EndCause) -> Option<ForcedEndOutcome> {
        if !self.credentials.is_present() {
            tracing::debug!(cause = ?cause, "No credential, nothing to end");
            return None;
        }
        let outcome = self.controller.force_end(cause).await;
        tracing::info!(cause = ?cause, outcome = ?outcome, "Forced end on power event");
        Some(outcome)
    }
}
