//! Tauri desktop shell
//!
//! Hosts the session core behind a tray icon and one window. Closing the
//! window hides it; the first exit request is held back until the running
//! session has been ended.

use tauri::menu::{Menu, MenuItem};
use tauri::{App, AppHandle, Emitter, Manager, RunEvent, WindowEvent};
use tokio::sync::{broadcast, mpsc};

use crate::events::TrackerEvent;
use crate::power_monitor::PowerAction;
use crate::production::os_signals::spawn_signal_forwarder;
use crate::state::AppState;

/// Event name the frontend listens on
pub const TRACKER_EVENT: &str = "tracker-event";

/// Initialize the application
pub fn setup_app(app: &App) -> Result<(), Box<dyn std::error::Error>> {
    let guard = crate::init_logging(&app.path().app_log_dir()?)?;
    // Keep guard alive for application lifetime
    std::mem::forget(guard);

    tracing::info!("Momentum starting up");

    let data_dir = app.path().app_data_dir()?;
    let state = tauri::async_runtime::block_on(AppState::new_production(&data_dir))?;

    if let Ok(token) = std::env::var("MOMENTUM_TOKEN") {
        if tauri::async_runtime::block_on(state.controller.login_and_recover(token)) {
            tracing::warn!("Resumed tracking a session left active by the previous run");
        }
    }

    forward_tracker_events(app.handle().clone(), state.controller.subscribe());
    forward_power_events(app.handle().clone());

    app.manage(state);
    setup_tray(app)?;

    if let Some(window) = app.get_webview_window("main") {
        let win = window.clone();
        window.on_window_event(move |event| {
            if let WindowEvent::CloseRequested { api, .. } = event {
                // Stay in the tray
                api.prevent_close();
                let _ = win.hide();
            }
        });
    }

    tracing::info!("Momentum initialized");
    Ok(())
}

/// Run-loop callback: the first exit request ends the session before exiting
pub fn handle_run_event(app: &AppHandle, event: RunEvent) {
    if let RunEvent::ExitRequested { api, .. } = event {
        if quit_gracefully(app) {
            api.prevent_exit();
        }
    }
}

/// Start the graceful quit. Returns false once a quit is already under way.
fn quit_gracefully(app: &AppHandle) -> bool {
    let Some(state) = app.try_state::<AppState>() else {
        return false;
    };
    let power = state.power.clone();
    if !power.intercept_quit() {
        tracing::debug!("Quit already intercepted, passing through");
        return false;
    }

    let handle = app.clone();
    tauri::async_runtime::spawn(async move {
        power.end_for_quit().await;
        handle.exit(0);
    });
    true
}

fn setup_tray(app: &App) -> Result<(), Box<dyn std::error::Error>> {
    let show = MenuItem::with_id(app, "show", "Show Momentum", true, None::<&str>)?;
    let quit = MenuItem::with_id(app, "quit", "Quit Momentum", true, None::<&str>)?;
    let menu = Menu::with_items(app, &[&show, &quit])?;

    let Some(tray) = app.tray_by_id("main") else {
        tracing::warn!("No tray icon configured");
        return Ok(());
    };
    tray.set_menu(Some(menu))?;
    tray.on_menu_event(|app, event| match event.id.as_ref() {
        "show" => {
            if let Some(window) = app.get_webview_window("main") {
                let _ = window.show();
                let _ = window.set_focus();
            }
        }
        "quit" => {
            if !quit_gracefully(app) {
                app.exit(0);
            }
        }
        _ => {}
    });

    Ok(())
}

fn forward_tracker_events(app: AppHandle, mut events: broadcast::Receiver<TrackerEvent>) {
    tauri::async_runtime::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = app.emit(TRACKER_EVENT, &event) {
                        tracing::warn!(error = %e, "Failed to emit tracker event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Dropped tracker events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn forward_power_events(app: AppHandle) {
    tauri::async_runtime::spawn(async move {
        let (tx, rx) = mpsc::channel(8);
        let _signals = match spawn_signal_forwarder(tx) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handlers");
                return;
            }
        };
        let Some(state) = app.try_state::<AppState>() else {
            return;
        };
        let power = state.power.clone();
        if power.run(rx).await == PowerAction::Exit {
            app.exit(0);
        }
    });
}
