use std::process::ExitCode;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use momentum_lib::config::default_data_dir;
use momentum_lib::production::os_signals::spawn_signal_forwarder;
use momentum_lib::commands::{self, CommandReply};
use momentum_lib::{init_logging, AppState, PowerAction, PowerEvent};

#[tokio::main]
async fn main() -> ExitCode {
    let data_dir = default_data_dir();
    let _log_guard = match init_logging(&data_dir.join("logs")) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("Momentum starting up");

    let state = match AppState::new_production(&data_dir).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize");
            return ExitCode::FAILURE;
        }
    };

    if let Ok(token) = std::env::var("MOMENTUM_TOKEN") {
        if state.controller.login_and_recover(token).await {
            tracing::warn!("Resumed tracking a session left active by the previous run");
        }
    }

    let (power_tx, mut power_rx) = mpsc::channel::<PowerEvent>(8);
    let _signals = match spawn_signal_forwarder(power_tx) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };

    // Commands run on their own tasks; power events never queue behind a slow call
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Result<CommandReply, String>>();
    let mut events = state.controller.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    tracing::info!("Momentum ready; type `help` for commands");

    loop {
        tokio::select! {
            Some(event) = power_rx.recv() => {
                if state.power.handle(event).await == PowerAction::Exit {
                    break;
                }
            }
            Some(reply) = reply_rx.recv() => match reply {
                Ok(reply) => {
                    println!("{}", reply.message);
                    if reply.exit {
                        break;
                    }
                }
                Err(message) => println!("error: {}", message),
            },
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        // Shell went away; treat like a quit
                        state.power.handle(PowerEvent::QuitRequested).await;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read command");
                        continue;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match commands::parse_line(&line) {
                    Ok(command) => command,
                    Err(usage) => {
                        println!("{}", usage.trim_end());
                        continue;
                    }
                };
                commands::spawn_execute(state.clone(), command, reply_tx.clone());
            }
            event = events.recv() => match event {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => println!("event: {}", json),
                    Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Dropped tracker events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    tracing::info!("Momentum shut down");
    ExitCode::SUCCESS
}
