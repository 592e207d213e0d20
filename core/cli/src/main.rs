//! Command-line client for the carline pickup coordination system.
//!
//! Parents submit and follow pickup requests; teachers work the line from
//! the dashboard. Run with no subcommand to land on whatever matches the
//! saved session: the dashboard for a signed-in teacher, the tracked request
//! for a waiting parent, and submission guidance otherwise.
//!
//! Human-readable output goes to stdout; diagnostics go to a daily log file
//! under the carline home directory so the rendered views stay clean.

use clap::{Parser, Subcommand};
use std::env;
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use carline_core::config;
use carline_core::SessionStore;

mod commands;
mod render;

#[derive(Parser)]
#[command(name = "carline", version, about = "School pickup line coordination")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a pickup request as a parent
    Submit(commands::SubmitArgs),
    /// Follow a submitted pickup request
    Track(commands::TrackArgs),
    /// Show the live teacher dashboard
    Dashboard(commands::DashboardArgs),
    /// Sign in as a teacher with the shared access code
    Login(commands::LoginArgs),
    /// Drop teacher access on this device
    Logout,
    /// Mark a request as seen
    Seen(commands::RecordArg),
    /// Mark a request as being processed
    Processing(commands::RecordArg),
    /// Mark the student as ready at the door
    Ready(commands::RecordArg),
    /// Mark the student as delivered
    Delivered(commands::RecordArg),
    /// Send a short reply to the parent
    Reply(commands::ReplyArgs),
    /// Archive a completed request
    Archive(commands::RecordArg),
}

fn main() {
    let cli = Cli::parse();
    let _log_guard = init_logging();

    if let Err(err) = run(cli) {
        error!(error = %err, "Command failed");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

/// File-backed logging; stdout is reserved for rendering. Returns `None`
/// when the log directory is unavailable, in which case diagnostics are
/// dropped rather than polluting the views.
fn init_logging() -> Option<WorkerGuard> {
    let logs_dir = config::get_logs_dir()?;
    fs_err::create_dir_all(&logs_dir).ok()?;

    let appender = tracing_appender::rolling::daily(&logs_dir, "carline.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let debug_enabled = env::var("CARLINE_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}

fn run(cli: Cli) -> carline_core::Result<()> {
    let sessions = SessionStore::at_default_path()?;
    let session = sessions.load();

    match cli.command {
        Some(Command::Submit(args)) => commands::submit(&sessions, &session, args),
        Some(Command::Track(args)) => commands::track(&sessions, &session, args),
        Some(Command::Dashboard(args)) => commands::dashboard(&session, args),
        Some(Command::Login(args)) => commands::login(&sessions, &session, args),
        Some(Command::Logout) => commands::logout(&sessions, &session),
        Some(Command::Seen(args)) => commands::seen(&session, args),
        Some(Command::Processing(args)) => commands::processing(&session, args),
        Some(Command::Ready(args)) => commands::ready(&session, args),
        Some(Command::Delivered(args)) => commands::delivered(&session, args),
        Some(Command::Reply(args)) => commands::reply(&session, args),
        Some(Command::Archive(args)) => commands::archive(&session, args),
        None => commands::open(&sessions, &session),
    }
}
