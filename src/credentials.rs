//! Process-wide bearer credential holder
//!
//! Set on login, cleared on logout, never persisted. Every outbound session
//! call reads it; an absent credential is a precondition failure.

use std::sync::RwLock;

#[derive(Default)]
pub struct CredentialHolder {
    token: RwLock<Option<String>>,
}

impl CredentialHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        let token = token.into();
        let mut guard = self.token.write().unwrap();
        *guard = if token.trim().is_empty() { None } else { Some(token) };
        tracing::info!(present = guard.is_some(), "Credential updated");
    }

    pub fn clear(&self) {
        *self.token.write().unwrap() = None;
        tracing::info!("Credential cleared");
    }

    /// Current bearer token, if a user is logged in
    pub fn current(&self) -> Option<String> {
        self.token.read().unwrap().clone()
    }

    pub fn is_present(&self) -> bool {
        self.token.read().unwrap().is_some()
    }
}
