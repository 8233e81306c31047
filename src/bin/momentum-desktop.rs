#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use momentum_lib::commands::desktop as commands;
use momentum_lib::desktop::{handle_run_event, setup_app};

fn main() {
    let app = tauri::Builder::default()
        .setup(|app| {
            setup_app(app)?;
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::login,
            commands::logout,
            commands::start_work,
            commands::end_work,
            commands::hold_work,
            commands::resume_work,
            commands::set_note,
            commands::get_status,
        ])
        .build(tauri::generate_context!())
        .expect("error while building tauri application");

    app.run(handle_run_event);
}
