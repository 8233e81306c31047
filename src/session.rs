//! Work session data model
//!
//! A single global session moves `Idle -> Active -> Held -> Active -> Idle`.
//! Elapsed time counts Active windows only: each window is measured from a
//! monotonic anchor and folded into `accumulated` when the session is held.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Active,
    Held,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Active => "active",
            SessionState::Held => "held",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user is working on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkContext {
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub note: Option<String>,
}

impl WorkContext {
    pub fn new(project_id: Option<String>, task_id: Option<String>, note: Option<String>) -> Self {
        Self { project_id, task_id, note }
    }

    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }
}

/// Persisted form of an Active session, used to pick capture back up after a restart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub started_at: DateTime<Utc>,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub note: Option<String>,
}

/// Read-only view handed to the UI layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub note: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_secs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    pub state: SessionState,
    pub context: WorkContext,
    /// Wall-clock start, shifted back by time already worked when resuming
    pub started_at: Option<DateTime<Utc>>,
    accumulated: Duration,
    running_anchor: Option<Instant>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active time so far; frozen while held
    pub fn elapsed(&self) -> Duration {
        match (self.state, self.running_anchor) {
            (SessionState::Active, Some(anchor)) => self.accumulated.saturating_add(anchor.elapsed()),
            _ => self.accumulated,
        }
    }

    /// Enter Active. Coming from Held keeps the time already worked.
    pub fn activate(&mut self, context: WorkContext, now_wall: DateTime<Utc>, now: Instant) {
        let carried = if self.state == SessionState::Held {
            self.accumulated
        } else {
            Duration::ZERO
        };
        let shift = chrono::Duration::from_std(carried).unwrap_or(chrono::Duration::zero());

        *self = Self {
            state: SessionState::Active,
            context,
            started_at: Some(now_wall - shift),
            accumulated: carried,
            running_anchor: Some(now),
        };
    }

    /// Freeze elapsed time and keep the context for a later resume
    pub fn hold(&mut self) {
        self.accumulated = self.elapsed();
        self.running_anchor = None;
        self.state = SessionState::Held;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Rebuild an Active session from a persisted record
    pub fn restore(&mut self, record: SessionRecord, now_wall: DateTime<Utc>, now: Instant) {
        let worked = (now_wall - record.started_at).to_std().unwrap_or(Duration::ZERO);
        *self = Self {
            state: SessionState::Active,
            context: WorkContext::new(record.project_id, record.task_id, record.note),
            started_at: Some(record.started_at),
            accumulated: worked,
            running_anchor: Some(now),
        };
    }

    pub fn record(&self) -> Option<SessionRecord> {
        if self.state != SessionState::Active {
            return None;
        }
        Some(SessionRecord {
            started_at: self.started_at?,
            project_id: self.context.project_id.clone(),
            task_id: self.context.task_id.clone(),
            note: self.context.note.clone(),
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            project_id: self.context.project_id.clone(),
            task_id: self.context.task_id.clone(),
            note: self.context.note.clone(),
            started_at: self.started_at,
            elapsed_secs: self.elapsed().as_secs(),
        }
    }
}
