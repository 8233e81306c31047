//! Tauri commands exposed to the frontend

use tauri::State;

use crate::session::{SessionSnapshot, WorkContext};
use crate::state::AppState;

/// Store the token and pick up a session left active by a previous run
#[tauri::command]
pub async fn login(state: State<'_, AppState>, token: String) -> Result<SessionSnapshot, String> {
    super::login(&state, token).await
}

#[tauri::command]
pub async fn logout(state: State<'_, AppState>) -> Result<String, String> {
    super::logout(&state).await
}

/// Begin a session, or continue a held one
#[tauri::command]
pub async fn start_work(
    state: State<'_, AppState>,
    project_id: Option<String>,
    task_id: Option<String>,
    note: Option<String>,
) -> Result<SessionSnapshot, String> {
    super::start_work(&state, WorkContext::new(project_id, task_id, note)).await
}

#[tauri::command]
pub async fn end_work(state: State<'_, AppState>, note: Option<String>) -> Result<SessionSnapshot, String> {
    super::end_work(&state, note).await
}

#[tauri::command]
pub async fn hold_work(state: State<'_, AppState>) -> Result<SessionSnapshot, String> {
    super::hold_work(&state).await
}

#[tauri::command]
pub async fn resume_work(state: State<'_, AppState>) -> Result<SessionSnapshot, String> {
    super::resume_work(&state).await
}

#[tauri::command]
pub async fn set_note(state: State<'_, AppState>, note: Option<String>) -> Result<SessionSnapshot, String> {
    super::set_note(&state, note).await
}

#[tauri::command]
pub fn get_status(state: State<'_, AppState>) -> SessionSnapshot {
    state.controller.snapshot()
}
