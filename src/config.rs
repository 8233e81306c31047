//! SQLite-based application configuration store and tracker settings

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Screenshot window is inverted: min {min}s > max {max}s")]
    InvalidWindow { min: u64, max: u64 },
}

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000/api/";

pub struct AppConfig {
    conn: Mutex<Connection>,
}

impl AppConfig {
    /// Create config table in an existing database connection
    pub fn init_table(conn: &Connection) -> Result<(), ConfigError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS app_config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );"
        ).map_err(|e| ConfigError::DatabaseError(e.to_string()))
    }

    /// Open (or create) the config database at `path`
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        let conn = Connection::open(path)
            .map_err(|e| ConfigError::DatabaseError(e.to_string()))?;
        Self::init_table(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open standalone in-memory config (for testing)
    pub fn open_in_memory() -> Result<Self, ConfigError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ConfigError::DatabaseError(e.to_string()))?;
        Self::init_table(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT value FROM app_config WHERE key = ?1",
            params![key],
            |row| row.get(0),
        );
        let ret = match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ConfigError::DatabaseError(e.to_string())),
        };
        tracing::debug!(key = %key, found = ret.as_ref().ok().and_then(|v| v.as_ref()).is_some(), "Config get");
        ret
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        tracing::debug!(key = %key, "Config set");
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO app_config (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, now],
        ).map_err(|e| ConfigError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<(), ConfigError> {
        tracing::debug!(key = %key, "Config delete");
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM app_config WHERE key = ?1",
            params![key],
        ).map_err(|e| ConfigError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ConfigError> {
        Ok(self.get(key)?.map(|v| v == "true").unwrap_or(false))
    }
}

/// Runtime knobs for the session core
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    pub api_base_url: String,
    pub screenshot_min: Duration,
    pub screenshot_max: Duration,
    pub idle_threshold: Duration,
    pub idle_poll_interval: Duration,
    pub forced_end_timeout: Duration,
    /// Stop the idle watchdog while a session is held, restart it on resume
    pub stop_watchdog_on_hold: bool,
    pub screenshot_dir: PathBuf,
}

impl TrackerSettings {
    pub fn with_screenshot_dir(screenshot_dir: PathBuf) -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            screenshot_min: Duration::from_secs(5 * 60),
            screenshot_max: Duration::from_secs(10 * 60),
            idle_threshold: Duration::from_secs(10 * 60),
            idle_poll_interval: Duration::from_secs(5),
            forced_end_timeout: Duration::from_secs(5),
            stop_watchdog_on_hold: true,
            screenshot_dir,
        }
    }

    /// Read settings from the config store, falling back to defaults.
    ///
    /// `API_BASE_URL` in the environment wins over the stored base URL.
    pub fn load(config: &AppConfig, data_dir: &Path) -> Result<Self, ConfigError> {
        let mut settings = Self::with_screenshot_dir(data_dir.join("screenshots"));

        if let Some(url) = config.get("api_base_url")? {
            settings.api_base_url = url;
        }
        if let Ok(url) = std::env::var("API_BASE_URL") {
            if !url.trim().is_empty() {
                settings.api_base_url = url;
            }
        }

        settings.screenshot_min = secs_or(config, "screenshot_min_secs", settings.screenshot_min)?;
        settings.screenshot_max = secs_or(config, "screenshot_max_secs", settings.screenshot_max)?;
        settings.idle_threshold = secs_or(config, "idle_threshold_secs", settings.idle_threshold)?;
        settings.idle_poll_interval = secs_or(config, "idle_poll_secs", settings.idle_poll_interval)?;
        settings.forced_end_timeout =
            secs_or(config, "forced_end_timeout_secs", settings.forced_end_timeout)?;

        if config.get("stop_watchdog_on_hold")?.is_some() {
            settings.stop_watchdog_on_hold = config.get_bool("stop_watchdog_on_hold")?;
        }
        if let Some(dir) = config.get("screenshot_dir")? {
            settings.screenshot_dir = PathBuf::from(dir);
        }

        if settings.screenshot_min > settings.screenshot_max {
            return Err(ConfigError::InvalidWindow {
                min: settings.screenshot_min.as_secs(),
                max: settings.screenshot_max.as_secs(),
            });
        }

        Ok(settings)
    }
}

fn secs_or(config: &AppConfig, key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let Some(raw) = config.get(key)? else {
        return Ok(default);
    };
    match u64::from_str(raw.trim()) {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => {
            tracing::warn!(key = %key, value = %raw, "Invalid duration in config, using default");
            Ok(default)
        }
    }
}

/// Data directory: `MOMENTUM_DATA_DIR`, else the platform data dir
pub fn default_data_dir() -> PathBuf {
    match std::env::var("MOMENTUM_DATA_DIR") {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("momentum"),
    }
}
