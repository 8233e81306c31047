//! Application state management

use std::path::Path;
use std::sync::Arc;

use crate::config::{AppConfig, TrackerSettings};
use crate::credentials::CredentialHolder;
use crate::lifecycle::{SessionController, TrackerDeps};
use crate::power_monitor::PowerMonitor;
use crate::production::{PrimaryScreenCapture, ReqwestSessionApi, SystemIdleSource, UniformMinuteDelay};

/// Application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub credentials: Arc<CredentialHolder>,
    pub controller: Arc<SessionController>,
    pub power: Arc<PowerMonitor>,
}

impl AppState {
    /// Create a new AppState with production implementations.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn new_production(data_dir: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        tracing::info!(path = %data_dir.display(), "Initializing AppState");
        std::fs::create_dir_all(data_dir)?;

        let config_path = data_dir.join("config.sqlite");
        tracing::info!(path = %config_path.display(), "Opening config database");
        let config = Arc::new(AppConfig::open(&config_path)?);

        let settings = TrackerSettings::load(&config, data_dir)?;
        std::fs::create_dir_all(&settings.screenshot_dir)?;

        tracing::info!(base_url = %settings.api_base_url, "Session API client initialized");
        let api = Arc::new(ReqwestSessionApi::new(&settings.api_base_url)?);

        let state = Self::from_parts(
            TrackerDeps {
                api,
                capture: Arc::new(PrimaryScreenCapture::new()),
                idle: Arc::new(SystemIdleSource::new()),
                delays: Arc::new(UniformMinuteDelay::new()),
                credentials: Arc::new(CredentialHolder::new()),
                config,
            },
            settings,
        );

        // Screenshots left behind by a crash were never uploaded
        state.controller.scheduler().sweep_scratch_dir().await;

        tracing::info!("AppState initialization complete");
        Ok(state)
    }

    /// Wire state from explicit dependencies
    pub fn from_parts(deps: TrackerDeps, settings: TrackerSettings) -> Self {
        let config = deps.config.clone();
        let credentials = deps.credentials.clone();
        let controller = SessionController::new(deps, settings);
        let power = Arc::new(PowerMonitor::new(controller.clone(), credentials.clone()));

        Self {
            config,
            credentials,
            controller,
            power,
        }
    }

    /// Create a new AppState with test implementations
    #[cfg(test)]
    pub fn new_test(screenshot_dir: std::path::PathBuf) -> (Self, Arc<crate::mocks::RecordedSessionApi>) {
        use crate::mocks::{FakeScreenCapture, FixedDelays, RecordedSessionApi, ScriptedIdleSource};

        let api = Arc::new(RecordedSessionApi::new());
        let state = Self::from_parts(
            TrackerDeps {
                api: api.clone(),
                capture: Arc::new(FakeScreenCapture::new()),
                idle: Arc::new(ScriptedIdleSource::active()),
                delays: Arc::new(FixedDelays::minutes(&[7])),
                credentials: Arc::new(CredentialHolder::new()),
                config: Arc::new(AppConfig::open_in_memory().unwrap()),
            },
            TrackerSettings::with_screenshot_dir(screenshot_dir),
        );
        (state, api)
    }
}
