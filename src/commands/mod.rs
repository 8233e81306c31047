//! Host commands
//!
//! The terminal host parses each typed line with clap
//! (`start --project P1 --task T4 fixing login`). Handlers return
//! `Result<_, String>` so failures reach the operator as a message they can
//! act on. The desktop shell wraps the same handlers as Tauri commands.

#[cfg(feature = "desktop")]
pub mod desktop;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::lifecycle::EndOptions;
use crate::power_monitor::{PowerAction, PowerEvent};
use crate::session::{SessionSnapshot, SessionState, WorkContext};
use crate::state::AppState;

#[derive(Parser)]
#[command(
    name = "momentum",
    no_binary_name = true,
    disable_version_flag = true,
    about = "Momentum - work session tracker"
)]
struct CommandLine {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Store the bearer token and pick up a session left active by a previous run
    Login { token: String },
    /// End any running session, then forget the token
    Logout,
    /// Begin a work session, or continue a held one
    Start {
        /// Project to track against
        #[arg(short, long)]
        project: Option<String>,
        /// Task within the project
        #[arg(short, long)]
        task: Option<String>,
        /// What you are working on
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        note: Vec<String>,
    },
    /// End the session
    End {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        note: Vec<String>,
    },
    /// Pause: ends on the server but keeps elapsed time and context
    Hold,
    /// Continue a held session
    Resume,
    /// Replace the note of the running or held session
    Note {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },
    /// Print the session as JSON
    Status,
    /// Behave as if the machine is going to sleep
    Suspend,
    /// Behave as if the machine is shutting down
    Shutdown,
    /// End the session and exit
    #[command(alias = "exit")]
    Quit,
}

/// Parse one typed line. Help output comes back as the error text.
pub fn parse_line(line: &str) -> Result<Command, String> {
    CommandLine::try_parse_from(line.split_whitespace())
        .map(|cli| cli.command)
        .map_err(|e| e.render().to_string())
}

fn joined(words: Vec<String>) -> Option<String> {
    let text = words.join(" ");
    (!text.is_empty()).then_some(text)
}

/// Outcome of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub message: String,
    /// The host should terminate after printing the message
    pub exit: bool,
}

impl From<String> for CommandReply {
    fn from(message: String) -> Self {
        Self { message, exit: false }
    }
}

pub async fn execute(state: &AppState, command: Command) -> Result<CommandReply, String> {
    match command {
        Command::Login { token } => {
            let snapshot = login(state, token).await?;
            let verb = if snapshot.state == SessionState::Active {
                "Logged in, resumed session"
            } else {
                "Logged in"
            };
            Ok(describe(verb, &snapshot).into())
        }
        Command::Logout => logout(state).await.map(Into::into),
        Command::Start { project, task, note } => {
            let context = WorkContext::new(project, task, joined(note));
            start_work(state, context).await.map(|s| describe("Started", &s).into())
        }
        Command::End { note } => end_work(state, joined(note)).await.map(|s| describe("Ended", &s).into()),
        Command::Hold => hold_work(state).await.map(|s| describe("Held", &s).into()),
        Command::Resume => resume_work(state).await.map(|s| describe("Resumed", &s).into()),
        Command::Note { text } => set_note(state, joined(text))
            .await
            .map(|s| describe("Note updated", &s).into()),
        Command::Status => get_status(state).map(Into::into),
        Command::Suspend => power(state, PowerEvent::Suspend).await,
        Command::Shutdown => power(state, PowerEvent::Shutdown).await,
        Command::Quit => power(state, PowerEvent::QuitRequested).await,
    }
}

/// Run a command on its own task and send the reply back to the host loop
pub fn spawn_execute(
    state: AppState,
    command: Command,
    replies: mpsc::UnboundedSender<Result<CommandReply, String>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if replies.send(execute(&state, command).await).is_err() {
            tracing::debug!("Host loop gone, dropping command reply");
        }
    })
}

async fn power(state: &AppState, event: PowerEvent) -> Result<CommandReply, String> {
    let action = state.power.handle(event).await;
    Ok(CommandReply {
        message: format!("{:?} handled", event),
        exit: action == PowerAction::Exit,
    })
}

/// Store the bearer credential, then recover a persisted active session
pub async fn login(state: &AppState, token: String) -> Result<SessionSnapshot, String> {
    if token.trim().is_empty() {
        return Err("Token must not be empty".to_string());
    }
    if state.controller.login_and_recover(token).await {
        tracing::warn!("Resumed tracking a session left active by the previous run");
    }
    Ok(state.controller.snapshot())
}

/// End any running session, then forget the credential
pub async fn logout(state: &AppState) -> Result<String, String> {
    let outcome = state.controller.logout().await;
    tracing::info!(outcome = ?outcome, "Logged out");
    Ok("Logged out".to_string())
}

pub async fn start_work(state: &AppState, context: WorkContext) -> Result<SessionSnapshot, String> {
    state.controller.start(context).await.map_err(|e| e.to_string())
}

pub async fn end_work(state: &AppState, note: Option<String>) -> Result<SessionSnapshot, String> {
    state
        .controller
        .end(note, EndOptions::default())
        .await
        .map_err(|e| e.to_string())
}

pub async fn hold_work(state: &AppState) -> Result<SessionSnapshot, String> {
    state.controller.hold().await.map_err(|e| e.to_string())
}

pub async fn resume_work(state: &AppState) -> Result<SessionSnapshot, String> {
    state.controller.resume().await.map_err(|e| e.to_string())
}

pub async fn set_note(state: &AppState, note: Option<String>) -> Result<SessionSnapshot, String> {
    state.controller.set_note(note).await.map_err(|e| e.to_string())
}

/// Current session as JSON
pub fn get_status(state: &AppState) -> Result<String, String> {
    serde_json::to_string(&state.controller.snapshot()).map_err(|e| e.to_string())
}

fn describe(verb: &str, snapshot: &SessionSnapshot) -> String {
    format!(
        "{}: state={} project={} task={} elapsed={}s",
        verb,
        snapshot.state,
        snapshot.project_id.as_deref().unwrap_or("-"),
        snapshot.task_id.as_deref().unwrap_or("-"),
        snapshot.elapsed_secs,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::lifecycle::ACTIVE_SESSION_KEY;
    use crate::session::SessionRecord;

    #[test]
    fn test_parse_start_with_context() {
        let command = parse_line("start --project P1 -t T9 fix the login bug").unwrap();
        assert_eq!(
            command,
            Command::Start {
                project: Some("P1".into()),
                task: Some("T9".into()),
                note: vec!["fix".into(), "the".into(), "login".into(), "bug".into()],
            }
        );
    }

    #[test]
    fn test_parse_bare_start_and_end() {
        assert_eq!(
            parse_line("start").unwrap(),
            Command::Start { project: None, task: None, note: vec![] }
        );
        assert_eq!(parse_line("end").unwrap(), Command::End { note: vec![] });
        match parse_line("note pairing - Sam").unwrap() {
            Command::Note { text } => assert_eq!(joined(text).as_deref(), Some("pairing - Sam")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors_and_help() {
        assert!(parse_line("").is_err());
        assert!(parse_line("login").is_err());
        assert!(parse_line("dance").unwrap_err().contains("unrecognized subcommand"));
        assert!(parse_line("help").unwrap_err().contains("hold"));
    }

    #[test]
    fn test_parse_quit_alias() {
        assert_eq!(parse_line("exit").unwrap(), Command::Quit);
        assert_eq!(parse_line("quit").unwrap(), Command::Quit);
    }

    #[tokio::test]
    async fn test_start_requires_login() {
        let dir = tempfile::tempdir().unwrap();
        let (state, api) = AppState::new_test(dir.path().to_path_buf());

        let err = execute(&state, parse_line("start").unwrap()).await.unwrap_err();

        assert_eq!(err, "Not logged in");
        assert_eq!(api.begin_count(), 0);
    }

    #[tokio::test]
    async fn test_full_command_flow() {
        let dir = tempfile::tempdir().unwrap();
        let (state, api) = AppState::new_test(dir.path().to_path_buf());

        execute(&state, parse_line("login abc").unwrap()).await.unwrap();
        let reply = execute(&state, parse_line("start -p P1 -t T1 docs").unwrap()).await.unwrap();
        assert!(reply.message.starts_with("Started: state=active project=P1 task=T1"));

        execute(&state, parse_line("hold").unwrap()).await.unwrap();
        let status: serde_json::Value =
            serde_json::from_str(&execute(&state, Command::Status).await.unwrap().message).unwrap();
        assert_eq!(status["state"], "held");

        execute(&state, parse_line("resume").unwrap()).await.unwrap();
        execute(&state, parse_line("end wrapped up").unwrap()).await.unwrap();

        assert_eq!(state.controller.state(), SessionState::Idle);
        assert_eq!(api.end_notes(), vec!["docs".to_string(), "wrapped up".to_string()]);
    }

    #[tokio::test]
    async fn test_login_recovers_persisted_session() {
        let dir = tempfile::tempdir().unwrap();
        let (state, api) = AppState::new_test(dir.path().to_path_buf());
        let record = SessionRecord {
            started_at: Utc::now() - chrono::Duration::seconds(120),
            project_id: Some("P4".into()),
            task_id: None,
            note: None,
        };
        state
            .config
            .set(ACTIVE_SESSION_KEY, &serde_json::to_string(&record).unwrap())
            .unwrap();

        let reply = execute(&state, parse_line("login abc").unwrap()).await.unwrap();

        assert!(reply.message.starts_with("Logged in, resumed session: state=active project=P4"));
        assert_eq!(state.controller.state(), SessionState::Active);
        assert!(state.controller.scheduler().is_running());
        assert_eq!(api.begin_count(), 0);
    }

    #[tokio::test]
    async fn test_quit_command_asks_to_exit() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _api) = AppState::new_test(dir.path().to_path_buf());

        let suspend = execute(&state, Command::Suspend).await.unwrap();
        assert!(!suspend.exit);

        let quit = execute(&state, Command::Quit).await.unwrap();
        assert!(quit.exit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_event_not_blocked_by_running_command() {
        let dir = tempfile::tempdir().unwrap();
        let (state, api) = AppState::new_test(dir.path().to_path_buf());
        execute(&state, parse_line("login abc").unwrap()).await.unwrap();
        api.set_behavior(crate::mocks::ApiBehavior::SlowBegin(std::time::Duration::from_secs(60)));
        let (tx, mut rx) = mpsc::unbounded_channel();

        spawn_execute(state.clone(), parse_line("start -p P1").unwrap(), tx);
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;

        let began = tokio::time::Instant::now();
        assert!(!execute(&state, Command::Suspend).await.unwrap().exit);
        assert!(began.elapsed() < std::time::Duration::from_secs(5));

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.unwrap_err(), "Interrupted by a system-initiated end");
        assert_eq!(state.controller.state(), SessionState::Idle);
        assert_eq!(api.end_notes(), vec!["System suspended".to_string()]);
    }

    #[tokio::test]
    async fn test_logout_ends_active_session() {
        let dir = tempfile::tempdir().unwrap();
        let (state, api) = AppState::new_test(dir.path().to_path_buf());
        execute(&state, parse_line("login abc").unwrap()).await.unwrap();
        execute(&state, parse_line("start").unwrap()).await.unwrap();

        execute(&state, Command::Logout).await.unwrap();

        assert_eq!(api.end_count(), 1);
        assert!(!state.credentials.is_present());
    }
}
