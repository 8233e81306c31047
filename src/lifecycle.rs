//! Session lifecycle controller
//!
//! The only writer of session state. User transitions (`start`, `end`,
//! `hold`, `resume`) surface errors to the caller; forced ends (idle,
//! suspend, shutdown, quit, logout) make one bounded attempt and swallow
//! failures. Scheduler and watchdog are started only after begin-session
//! succeeds and stopped only after end-session resolves.
//!
//! Suspend, shutdown, quit and logout preempt a user transition whose network
//! call is still in flight, so they never wait on it. Idle timeouts queue
//! behind it and are dropped if the watchdog run that raised them has ended.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, TrackerSettings};
use crate::credentials::CredentialHolder;
use crate::events::{EventBus, TrackerEvent};
use crate::idle_watchdog::{IdleTimeout, IdleWatchdog};
use crate::screenshot_scheduler::ScreenshotScheduler;
use crate::session::{Session, SessionRecord, SessionSnapshot, SessionState, WorkContext};
use crate::traits::{
    ApiError, BeginSessionRequest, DelaySource, EndSessionRequest, IdleSource, ScreenCapture,
    SessionApi,
};

/// Config key holding the persisted active session
pub const ACTIVE_SESSION_KEY: &str = "active_session";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not logged in")]
    NotLoggedIn,
    #[error("Cannot {action} while session is {from}")]
    InvalidTransition {
        from: SessionState,
        action: &'static str,
    },
    #[error("Interrupted by a system-initiated end")]
    Interrupted,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Options for `end`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndOptions {
    /// Hold path: the caller moves the session to Held itself
    pub temporary: bool,
}

/// Why a session is being ended by the system rather than the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndCause {
    Idle,
    Suspend,
    Shutdown,
    Quit,
    Logout,
}

impl EndCause {
    /// Note sent with the end-session call
    pub fn note(&self) -> Option<&'static str> {
        match self {
            EndCause::Idle => Some("Idle timeout"),
            EndCause::Suspend => Some("System suspended"),
            EndCause::Shutdown => Some("System shutdown"),
            EndCause::Quit | EndCause::Logout => None,
        }
    }

    /// Whether this end cancels a user transition that is mid-call
    pub fn preempts(&self) -> bool {
        !matches!(self, EndCause::Idle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedEndOutcome {
    /// Server acknowledged the end
    Delivered,
    /// Call failed; session ended locally anyway
    Failed,
    /// Call did not resolve within the budget; session ended locally anyway
    TimedOut,
    /// No credential to authorize the call; session ended locally
    NoCredential,
    /// Nothing was running
    NotActive,
    /// Idle timeout from a watchdog run that has since stopped
    Stale,
}

/// External collaborators of the controller
pub struct TrackerDeps {
    pub api: Arc<dyn SessionApi>,
    pub capture: Arc<dyn ScreenCapture>,
    pub idle: Arc<dyn IdleSource>,
    pub delays: Arc<dyn DelaySource>,
    pub credentials: Arc<CredentialHolder>,
    pub config: Arc<AppConfig>,
}

pub struct SessionController {
    api: Arc<dyn SessionApi>,
    credentials: Arc<CredentialHolder>,
    config: Arc<AppConfig>,
    settings: TrackerSettings,
    scheduler: ScreenshotScheduler,
    watchdog: IdleWatchdog,
    events: EventBus,
    session: Mutex<Session>,
    // Serializes transitions across their network await
    transition: tokio::sync::Mutex<()>,
    // Cancelled and replaced by every preempting forced end
    preempt: Mutex<CancellationToken>,
    begin_in_flight: AtomicBool,
}

impl SessionController {
    /// Build the controller and spawn its idle-timeout listener.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(deps: TrackerDeps, settings: TrackerSettings) -> Arc<Self> {
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();

        let scheduler = ScreenshotScheduler::new(
            deps.capture,
            deps.api.clone(),
            deps.credentials.clone(),
            deps.delays,
            (settings.screenshot_min, settings.screenshot_max),
            settings.screenshot_dir.clone(),
        );
        let watchdog = IdleWatchdog::new(
            deps.idle,
            settings.idle_threshold,
            settings.idle_poll_interval,
            idle_tx,
        );

        let controller = Arc::new(Self {
            api: deps.api,
            credentials: deps.credentials,
            config: deps.config,
            settings,
            scheduler,
            watchdog,
            events: EventBus::new(),
            session: Mutex::new(Session::new()),
            transition: tokio::sync::Mutex::new(()),
            preempt: Mutex::new(CancellationToken::new()),
            begin_in_flight: AtomicBool::new(false),
        });

        tokio::spawn(idle_listener(Arc::downgrade(&controller), idle_rx));
        controller
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.session.lock().unwrap().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.lock().unwrap().snapshot()
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn scheduler(&self) -> &ScreenshotScheduler {
        &self.scheduler
    }

    pub fn watchdog(&self) -> &IdleWatchdog {
        &self.watchdog
    }

    pub fn login(&self, token: impl Into<String>) {
        self.credentials.set(token);
    }

    /// Store the credential, then pick up a session a previous run left active
    pub async fn login_and_recover(&self, token: impl Into<String>) -> bool {
        self.login(token);
        self.recover().await
    }

    /// End any running session, then drop the credential
    pub async fn logout(&self) -> ForcedEndOutcome {
        let outcome = self.force_end(EndCause::Logout).await;
        self.credentials.clear();
        outcome
    }

    /// Begin a session from Idle, or continue a held one
    pub async fn start(&self, context: WorkContext) -> Result<SessionSnapshot, SessionError> {
        let preempt = self.preempt_token();
        let _transition = self.transition.lock().await;
        self.start_locked(context, &preempt).await
    }

    /// End the session. With `temporary` the state is left for the caller to move to Held.
    pub async fn end(&self, note: Option<String>, options: EndOptions) -> Result<SessionSnapshot, SessionError> {
        let preempt = self.preempt_token();
        let _transition = self.transition.lock().await;
        self.end_locked(note, options, &preempt).await
    }

    /// End on the server, freeze elapsed time and keep the context for `resume`
    pub async fn hold(&self) -> Result<SessionSnapshot, SessionError> {
        let preempt = self.preempt_token();
        let _transition = self.transition.lock().await;

        let (from, note) = {
            let session = self.session.lock().unwrap();
            (session.state, session.context.note.clone())
        };
        if from != SessionState::Active {
            return Err(SessionError::InvalidTransition { from, action: "hold" });
        }

        self.end_locked(note, EndOptions { temporary: true }, &preempt).await?;

        let snapshot = {
            let mut session = self.session.lock().unwrap();
            session.hold();
            session.snapshot()
        };
        if self.settings.stop_watchdog_on_hold {
            self.watchdog.stop();
        }
        self.clear_record();
        tracing::info!(elapsed_secs = snapshot.elapsed_secs, "Session held");
        self.events.emit(TrackerEvent::SessionStateChanged { state: SessionState::Held });
        Ok(snapshot)
    }

    /// Start again with the context captured at hold time
    pub async fn resume(&self) -> Result<SessionSnapshot, SessionError> {
        let preempt = self.preempt_token();
        let _transition = self.transition.lock().await;

        let (from, context) = {
            let session = self.session.lock().unwrap();
            (session.state, session.context.clone())
        };
        if from != SessionState::Held {
            return Err(SessionError::InvalidTransition { from, action: "resume" });
        }
        self.start_locked(context, &preempt).await
    }

    /// Replace the note of the running or held session
    pub async fn set_note(&self, note: Option<String>) -> Result<SessionSnapshot, SessionError> {
        let _transition = self.transition.lock().await;

        let snapshot = {
            let mut session = self.session.lock().unwrap();
            if session.state == SessionState::Idle {
                return Err(SessionError::InvalidTransition {
                    from: SessionState::Idle,
                    action: "edit note",
                });
            }
            session.context.note = note;
            session.snapshot()
        };
        self.persist_record();
        Ok(snapshot)
    }

    /// System-initiated end: one end-session attempt within the forced-end budget.
    ///
    /// The session is ended locally whatever the server says. Every state
    /// change happens under the transition lock.
    pub async fn force_end(&self, cause: EndCause) -> ForcedEndOutcome {
        self.force_end_checked(cause, None).await
    }

    /// Pick an Active session back up after a restart without calling begin-session
    pub async fn recover(&self) -> bool {
        let _transition = self.transition.lock().await;

        if self.state() != SessionState::Idle {
            return false;
        }
        let raw = match self.config.get(ACTIVE_SESSION_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read persisted session");
                return false;
            }
        };
        let record: SessionRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding corrupt persisted session");
                self.clear_record();
                return false;
            }
        };
        if !self.credentials.is_present() {
            tracing::info!("Persisted session found but not logged in; not recovering yet");
            return false;
        }

        self.session
            .lock()
            .unwrap()
            .restore(record, Utc::now(), Instant::now());
        self.scheduler.start();
        self.watchdog.start();
        tracing::info!("Recovered active session from previous run");
        self.events.emit(TrackerEvent::SessionStateChanged { state: SessionState::Active });
        true
    }

    async fn start_locked(&self, context: WorkContext, preempt: &CancellationToken) -> Result<SessionSnapshot, SessionError> {
        let from = self.state();
        if from == SessionState::Active {
            return Err(SessionError::InvalidTransition { from, action: "start" });
        }
        let token = self.credentials.current().ok_or(SessionError::NotLoggedIn)?;

        let request = BeginSessionRequest {
            project_id: context.project_id.clone(),
            task_id: context.task_id.clone(),
            note: context.note.clone().unwrap_or_default(),
        };
        self.begin_in_flight.store(true, Ordering::SeqCst);
        let result = interruptible(preempt, self.api.begin_session(&token, &request)).await;
        self.begin_in_flight.store(false, Ordering::SeqCst);
        if let Err(e) = result {
            tracing::error!(error = %e, "Start work error");
            return Err(e);
        }

        let snapshot = {
            let mut session = self.session.lock().unwrap();
            session.activate(context, Utc::now(), Instant::now());
            session.snapshot()
        };
        self.persist_record();
        self.scheduler.start();
        self.watchdog.start();

        tracing::info!(
            resumed = from == SessionState::Held,
            elapsed_secs = snapshot.elapsed_secs,
            "Session active"
        );
        self.events.emit(TrackerEvent::SessionStateChanged { state: SessionState::Active });
        Ok(snapshot)
    }

    async fn end_locked(
        &self,
        note: Option<String>,
        options: EndOptions,
        preempt: &CancellationToken,
    ) -> Result<SessionSnapshot, SessionError> {
        let from = self.state();
        if from == SessionState::Idle {
            return Err(SessionError::InvalidTransition { from, action: "end" });
        }
        let token = self.credentials.current().ok_or(SessionError::NotLoggedIn)?;

        let request = EndSessionRequest {
            note: note.unwrap_or_default(),
        };
        if let Err(e) = interruptible(preempt, self.api.end_session(&token, &request)).await {
            tracing::error!(error = %e, "End work error");
            return Err(e);
        }

        self.scheduler.stop();
        if options.temporary {
            return Ok(self.snapshot());
        }

        let snapshot = {
            let mut session = self.session.lock().unwrap();
            session.reset();
            session.snapshot()
        };
        self.watchdog.stop();
        self.clear_record();
        tracing::info!("Session ended");
        self.events.emit(TrackerEvent::SessionStateChanged { state: SessionState::Idle });
        Ok(snapshot)
    }

    async fn force_end_checked(&self, cause: EndCause, idle_generation: Option<u64>) -> ForcedEndOutcome {
        let begin_interrupted = cause.preempts() && self.preempt_transitions();
        let _transition = self.transition.lock().await;

        if let Some(generation) = idle_generation {
            if !self.watchdog.is_current(generation) {
                tracing::debug!(generation, "Idle timeout went stale while waiting");
                return ForcedEndOutcome::Stale;
            }
        }
        let state = self.state();
        if cause == EndCause::Idle && state == SessionState::Held && self.settings.stop_watchdog_on_hold {
            return ForcedEndOutcome::Stale;
        }
        // An interrupted begin may still have reached the server
        if state == SessionState::Idle && !begin_interrupted {
            tracing::debug!(cause = ?cause, "Forced end with no session");
            return ForcedEndOutcome::NotActive;
        }
        let Some(token) = self.credentials.current() else {
            tracing::warn!(cause = ?cause, "Forced end without credential, ending locally");
            if state != SessionState::Idle {
                self.finish_forced_end(cause);
            }
            return ForcedEndOutcome::NoCredential;
        };

        let request = EndSessionRequest {
            note: cause.note().unwrap_or_default().to_string(),
        };
        let budget = self.settings.forced_end_timeout;
        let outcome = match tokio::time::timeout(budget, self.api.end_session(&token, &request)).await {
            Ok(Ok(())) => {
                tracing::info!(cause = ?cause, "Session force-ended");
                ForcedEndOutcome::Delivered
            }
            Ok(Err(e)) => {
                tracing::warn!(cause = ?cause, error = %e, "Forced end-session failed");
                ForcedEndOutcome::Failed
            }
            Err(_) => {
                tracing::warn!(
                    cause = ?cause,
                    budget_secs = budget.as_secs(),
                    "Forced end did not complete in time, ending locally"
                );
                ForcedEndOutcome::TimedOut
            }
        };
        if state != SessionState::Idle {
            self.finish_forced_end(cause);
        }
        outcome
    }

    fn preempt_token(&self) -> CancellationToken {
        self.preempt.lock().unwrap().clone()
    }

    /// Cancel every user transition requested so far. Returns whether a
    /// begin-session call was mid-flight.
    fn preempt_transitions(&self) -> bool {
        let begin_pending = self.begin_in_flight.load(Ordering::SeqCst);
        let previous = std::mem::replace(&mut *self.preempt.lock().unwrap(), CancellationToken::new());
        previous.cancel();
        begin_pending
    }

    fn finish_forced_end(&self, cause: EndCause) {
        self.scheduler.stop();
        self.watchdog.stop();
        self.session.lock().unwrap().reset();
        self.clear_record();
        self.events.emit(TrackerEvent::SessionStateChanged { state: SessionState::Idle });
        if cause == EndCause::Idle {
            self.events.emit(TrackerEvent::EndedDueToIdle);
        }
    }

    async fn handle_idle_timeout(&self, timeout: IdleTimeout) {
        if !self.watchdog.is_current(timeout.generation) {
            tracing::debug!(generation = timeout.generation, "Ignoring stale idle timeout");
            return;
        }
        tracing::info!(idle_secs = timeout.idle_secs, "Ending session due to inactivity");
        let outcome = self.force_end_checked(EndCause::Idle, Some(timeout.generation)).await;
        tracing::debug!(outcome = ?outcome, "Idle forced end finished");
    }

    fn persist_record(&self) {
        let record = self.session.lock().unwrap().record();
        let Some(record) = record else {
            return;
        };
        let result = serde_json::to_string(&record)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                self.config
                    .set(ACTIVE_SESSION_KEY, &json)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to persist active session");
        }
    }

    fn clear_record(&self) {
        if let Err(e) = self.config.delete(ACTIVE_SESSION_KEY) {
            tracing::warn!(error = %e, "Failed to clear persisted session");
        }
    }
}

async fn interruptible<F>(preempt: &CancellationToken, call: F) -> Result<(), SessionError>
where
    F: Future<Output = Result<(), ApiError>>,
{
    tokio::select! {
        biased;
        _ = preempt.cancelled() => Err(SessionError::Interrupted),
        result = call => result.map_err(SessionError::from),
    }
}

async fn idle_listener(controller: Weak<SessionController>, mut rx: mpsc::UnboundedReceiver<IdleTimeout>) {
    while let Some(timeout) = rx.recv().await {
        let Some(controller) = controller.upgrade() else {
            break;
        };
        controller.handle_idle_timeout(timeout).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;
    use crate::mocks::{FakeScreenCapture, FixedDelays, RecordedSessionApi, ScriptedIdleSource};
    use crate::traits::MockSessionApi;

    struct Harness {
        controller: Arc<SessionController>,
        api: Arc<RecordedSessionApi>,
        capture: Arc<FakeScreenCapture>,
        idle: Arc<ScriptedIdleSource>,
        config: Arc<AppConfig>,
        _dir: tempfile::TempDir,
    }

    fn settings(dir: &Path) -> TrackerSettings {
        TrackerSettings::with_screenshot_dir(dir.join("screenshots"))
    }

    fn harness() -> Harness {
        harness_with(|_| {})
    }

    fn harness_with(adjust: impl FnOnce(&mut TrackerSettings)) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(RecordedSessionApi::success());
        let capture = Arc::new(FakeScreenCapture::new());
        let idle = Arc::new(ScriptedIdleSource::active());
        let config = Arc::new(AppConfig::open_in_memory().unwrap());
        let credentials = Arc::new(CredentialHolder::new());
        credentials.set("tok");

        let controller = SessionController::new(
            TrackerDeps {
                api: api.clone(),
                capture: capture.clone(),
                idle: idle.clone(),
                delays: Arc::new(FixedDelays::minutes(&[7])),
                credentials,
                config: config.clone(),
            },
            {
                let mut settings = settings(dir.path());
                adjust(&mut settings);
                settings
            },
        );

        Harness { controller, api, capture, idle, config, _dir: dir }
    }

    #[tokio::test]
    async fn test_start_sends_context_and_activates() {
        let h = harness();
        let context = WorkContext::new(Some("P1".into()), Some("T1".into()), Some("sprint".into()));

        let snapshot = h.controller.start(context).await.unwrap();

        assert_eq!(snapshot.state, SessionState::Active);
        assert!(snapshot.started_at.is_some());
        assert_eq!(
            h.api.calls()[0],
            crate::mocks::ApiCall::Begin {
                token: "tok".into(),
                request: BeginSessionRequest {
                    project_id: Some("P1".into()),
                    task_id: Some("T1".into()),
                    note: "sprint".into(),
                },
            }
        );
        assert!(h.controller.scheduler().is_running());
        assert!(h.controller.watchdog().is_running());
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid() {
        let h = harness();
        h.controller.start(WorkContext::default()).await.unwrap();

        let err = h.controller.start(WorkContext::default()).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { from: SessionState::Active, action: "start" }));
        assert_eq!(h.api.begin_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_start_leaves_idle_and_starts_nothing() {
        let h = harness();
        h.api.set_behavior(crate::mocks::ApiBehavior::AlwaysFail(ApiError::Rejected("Project closed".into())));

        let err = h.controller.start(WorkContext::for_project("P1")).await.unwrap_err();

        assert_eq!(err.to_string(), "Request rejected: Project closed");
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(!h.controller.scheduler().is_running());
        assert!(!h.controller.watchdog().is_running());
    }

    #[tokio::test]
    async fn test_precondition_failures_never_hit_network() {
        let mut api = MockSessionApi::new();
        api.expect_begin_session().never();
        api.expect_end_session().never();
        let dir = tempfile::tempdir().unwrap();
        let controller = SessionController::new(
            TrackerDeps {
                api: Arc::new(api),
                capture: Arc::new(FakeScreenCapture::new()),
                idle: Arc::new(ScriptedIdleSource::active()),
                delays: Arc::new(FixedDelays::minutes(&[7])),
                credentials: Arc::new(CredentialHolder::new()),
                config: Arc::new(AppConfig::open_in_memory().unwrap()),
            },
            settings(dir.path()),
        );

        assert!(matches!(controller.start(WorkContext::default()).await, Err(SessionError::NotLoggedIn)));
        assert!(matches!(
            controller.end(None, EndOptions::default()).await,
            Err(SessionError::InvalidTransition { from: SessionState::Idle, .. })
        ));
        assert!(matches!(controller.resume().await, Err(SessionError::InvalidTransition { .. })));
        assert!(matches!(controller.hold().await, Err(SessionError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_end_resets_and_stops_everything() {
        let h = harness();
        h.controller.start(WorkContext::for_project("P1")).await.unwrap();

        let snapshot = h.controller.end(Some("done".into()), EndOptions::default()).await.unwrap();

        assert_eq!(snapshot.state, SessionState::Idle);
        assert_eq!(snapshot.started_at, None);
        assert_eq!(h.api.end_notes(), vec!["done".to_string()]);
        assert!(!h.controller.scheduler().is_running());
        assert!(!h.controller.watchdog().is_running());
    }

    #[tokio::test]
    async fn test_failed_end_keeps_session_running() {
        let h = harness();
        h.controller.start(WorkContext::default()).await.unwrap();
        h.api.set_behavior(crate::mocks::ApiBehavior::AlwaysFail(ApiError::NetworkError("offline".into())));

        let err = h.controller.end(None, EndOptions::default()).await.unwrap_err();

        assert!(matches!(err, SessionError::Api(ApiError::NetworkError(_))));
        assert_eq!(h.controller.state(), SessionState::Active);
        assert!(h.controller.scheduler().is_running());
    }

    #[tokio::test]
    async fn test_temporary_end_stops_capture_but_keeps_state() {
        let h = harness();
        h.controller.start(WorkContext::default()).await.unwrap();

        let snapshot = h.controller.end(None, EndOptions { temporary: true }).await.unwrap();

        assert_eq!(snapshot.state, SessionState::Active);
        assert!(!h.controller.scheduler().is_running());
        assert!(h.controller.watchdog().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_and_resume_continue_elapsed() {
        let h = harness();
        h.controller
            .start(WorkContext::new(Some("P1".into()), Some("T1".into()), Some("write docs".into())))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        let held = h.controller.hold().await.unwrap();
        assert_eq!(held.state, SessionState::Held);
        assert_eq!(held.elapsed_secs, 30);
        assert_eq!(h.api.end_notes(), vec!["write docs".to_string()]);
        assert!(!h.controller.scheduler().is_running());
        assert!(!h.controller.watchdog().is_running());

        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(h.controller.snapshot().elapsed_secs, 30);

        let resumed = h.controller.resume().await.unwrap();
        assert_eq!(resumed.state, SessionState::Active);
        assert_eq!(resumed.elapsed_secs, 30);
        assert_eq!(resumed.project_id.as_deref(), Some("P1"));
        assert_eq!(resumed.task_id.as_deref(), Some("T1"));
        assert_eq!(h.api.begin_count(), 2);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(h.controller.snapshot().elapsed_secs, 40);
    }

    #[tokio::test]
    async fn test_failed_resume_stays_held() {
        let h = harness();
        h.controller.start(WorkContext::default()).await.unwrap();
        h.controller.hold().await.unwrap();
        h.api.set_behavior(crate::mocks::ApiBehavior::AlwaysFail(ApiError::Timeout));

        assert!(h.controller.resume().await.is_err());
        assert_eq!(h.controller.state(), SessionState::Held);
        assert!(!h.controller.scheduler().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_force_ends_once() {
        let h = harness();
        let mut events = h.controller.subscribe();
        h.controller.start(WorkContext::default()).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), TrackerEvent::SessionStateChanged { state: SessionState::Active });

        h.idle.set(700.0);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.api.end_notes(), vec!["Idle timeout".to_string()]);
        assert_eq!(events.recv().await.unwrap(), TrackerEvent::SessionStateChanged { state: SessionState::Idle });
        assert_eq!(events.recv().await.unwrap(), TrackerEvent::EndedDueToIdle);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_session_ignores_idle_when_watchdog_stops_on_hold() {
        let h = harness();
        h.controller.start(WorkContext::default()).await.unwrap();
        h.controller.hold().await.unwrap();

        h.idle.set(5_000.0);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(h.controller.state(), SessionState::Held);
        assert_eq!(h.api.end_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_session_is_idle_ended_when_watchdog_keeps_running() {
        let h = harness_with(|s| s.stop_watchdog_on_hold = false);
        let mut events = h.controller.subscribe();
        h.controller.start(WorkContext::default()).await.unwrap();
        h.controller.hold().await.unwrap();
        assert!(h.controller.watchdog().is_running());

        h.idle.set(700.0);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.api.end_notes(), vec![String::new(), "Idle timeout".to_string()]);
        let received: Vec<TrackerEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(
            received,
            vec![
                TrackerEvent::SessionStateChanged { state: SessionState::Active },
                TrackerEvent::SessionStateChanged { state: SessionState::Held },
                TrackerEvent::SessionStateChanged { state: SessionState::Idle },
                TrackerEvent::EndedDueToIdle,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_raised_during_slow_hold_is_dropped() {
        let h = harness();
        let mut events = h.controller.subscribe();
        h.controller.start(WorkContext::default()).await.unwrap();
        h.api.set_behavior(crate::mocks::ApiBehavior::SlowEnd(Duration::from_secs(2)));
        h.idle.set(700.0);

        // Hold's end call spans the first idle poll at 5s
        tokio::time::sleep(Duration::from_secs(4)).await;
        h.controller.hold().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(h.controller.state(), SessionState::Held);
        assert_eq!(h.api.end_notes(), vec![String::new()]);
        let received: Vec<TrackerEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert!(!received.contains(&TrackerEvent::EndedDueToIdle));

        let resumed = h.controller.resume().await.unwrap();
        assert_eq!(resumed.state, SessionState::Active);
        assert_eq!(resumed.elapsed_secs, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_preempts_slow_resume() {
        let h = harness();
        h.controller.start(WorkContext::default()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        h.controller.hold().await.unwrap();
        h.api.set_behavior(crate::mocks::ApiBehavior::SlowBegin(Duration::from_secs(10)));

        let controller = h.controller.clone();
        let resume = tokio::spawn(async move { controller.resume().await });
        tokio::time::sleep(Duration::from_secs(1)).await;

        let outcome = h.controller.force_end(EndCause::Suspend).await;

        assert_eq!(outcome, ForcedEndOutcome::Delivered);
        assert!(matches!(resume.await.unwrap(), Err(SessionError::Interrupted)));
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.api.end_notes(), vec![String::new(), "System suspended".to_string()]);
        assert!(!h.controller.scheduler().is_running());
        assert!(!h.controller.watchdog().is_running());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.controller.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_slow_start_still_ends_on_server() {
        let h = harness();
        h.api.set_behavior(crate::mocks::ApiBehavior::SlowBegin(Duration::from_secs(10)));

        let controller = h.controller.clone();
        let start = tokio::spawn(async move { controller.start(WorkContext::for_project("P1")).await });
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(h.controller.force_end(EndCause::Shutdown).await, ForcedEndOutcome::Delivered);
        assert!(matches!(start.await.unwrap(), Err(SessionError::Interrupted)));
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.api.end_notes(), vec!["System shutdown".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_end_times_out_and_ends_locally() {
        let h = harness();
        h.controller.start(WorkContext::default()).await.unwrap();
        h.api.set_behavior(crate::mocks::ApiBehavior::Hang);

        let outcome = h.controller.force_end(EndCause::Shutdown).await;

        assert_eq!(outcome, ForcedEndOutcome::TimedOut);
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(!h.controller.scheduler().is_running());
    }

    #[tokio::test]
    async fn test_forced_end_swallows_failure() {
        let h = harness();
        h.controller.start(WorkContext::default()).await.unwrap();
        h.api.set_behavior(crate::mocks::ApiBehavior::AlwaysFail(ApiError::HttpError {
            status: 500,
            message: "Server Error".into(),
        }));

        assert_eq!(h.controller.force_end(EndCause::Suspend).await, ForcedEndOutcome::Failed);
        assert_eq!(h.controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_forced_end_when_idle_is_noop() {
        let h = harness();
        assert_eq!(h.controller.force_end(EndCause::Quit).await, ForcedEndOutcome::NotActive);
        assert_eq!(h.api.end_count(), 0);
    }

    #[tokio::test]
    async fn test_logout_ends_session_and_clears_credential() {
        let h = harness();
        h.controller.start(WorkContext::default()).await.unwrap();

        assert_eq!(h.controller.logout().await, ForcedEndOutcome::Delivered);
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.api.end_notes(), vec![String::new()]);
        assert!(matches!(h.controller.start(WorkContext::default()).await, Err(SessionError::NotLoggedIn)));
    }

    #[tokio::test]
    async fn test_set_note_used_by_hold() {
        let h = harness();
        h.controller.start(WorkContext::default()).await.unwrap();

        h.controller.set_note(Some("pairing".into())).await.unwrap();
        h.controller.hold().await.unwrap();

        assert_eq!(h.api.end_notes(), vec!["pairing".to_string()]);
        assert!(h.controller.set_note(None).await.is_ok());
    }

    #[tokio::test]
    async fn test_active_session_persisted_and_cleared() {
        let h = harness();
        h.controller.start(WorkContext::for_project("P7")).await.unwrap();

        let raw = h.config.get(ACTIVE_SESSION_KEY).unwrap().unwrap();
        let record: SessionRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.project_id.as_deref(), Some("P7"));

        h.controller.hold().await.unwrap();
        assert_eq!(h.config.get(ACTIVE_SESSION_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_recover_restarts_capture_without_begin_call() {
        let h = harness();
        let record = SessionRecord {
            started_at: Utc::now() - chrono::Duration::seconds(300),
            project_id: Some("P1".into()),
            task_id: None,
            note: None,
        };
        h.config
            .set(ACTIVE_SESSION_KEY, &serde_json::to_string(&record).unwrap())
            .unwrap();

        assert!(h.controller.recover().await);

        assert_eq!(h.controller.state(), SessionState::Active);
        assert!(h.controller.snapshot().elapsed_secs >= 300);
        assert!(h.controller.scheduler().is_running());
        assert_eq!(h.api.begin_count(), 0);
        assert!(!h.controller.recover().await, "already active");
    }

    #[tokio::test]
    async fn test_recover_discards_corrupt_record() {
        let h = harness();
        h.config.set(ACTIVE_SESSION_KEY, "{not json").unwrap();

        assert!(!h.controller.recover().await);
        assert_eq!(h.config.get(ACTIVE_SESSION_KEY).unwrap(), None);
        assert_eq!(h.capture.capture_count(), 0);
    }
}
