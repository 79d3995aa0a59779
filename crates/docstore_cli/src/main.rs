//! Terminal runner for the docstore demo.
//!
//! # Responsibility
//! - Run the demo session against a local store and print its log.
//! - Exit non-zero when any run fails or degrades.

use clap::Parser;
use docstore_core::{
    default_log_level, init_logging, OpenOptions, PopulateOutcome, Session, SessionConfig,
};
use std::path::PathBuf;
use std::process::ExitCode;

/// Runs the docstore lifecycle demo and prints the session log.
#[derive(Parser, Debug)]
#[command(name = "docstore", version, about)]
struct Args {
    /// Directory holding the store file.
    #[arg(short = 'd', long, default_value = ".")]
    dir: PathBuf,

    /// Store adapter (sqlite, memory).
    #[arg(short = 'a', long, default_value = "sqlite")]
    adapter: String,

    /// Store name inside the directory.
    #[arg(long, default_value = "mydb.db")]
    name: String,

    /// Write diagnostic logs to this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Number of consecutive demo runs on one session.
    #[arg(long, default_value_t = 1)]
    runs: u32,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(log_dir) = &args.log_dir {
        let level = args.log_level.as_deref().unwrap_or(default_log_level());
        let started = std::path::absolute(log_dir)
            .map_err(|err| err.to_string())
            .and_then(|dir| {
                init_logging(level, &dir.to_string_lossy()).map_err(|err| err.to_string())
            });
        if let Err(err) = started {
            eprintln!("docstore: logging disabled: {err}");
        }
    }

    let (session, failed) = run_demos(&args);
    for entry in session.log().entries() {
        println!("[{}] {}", entry.key(), entry.message);
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn session_config(args: &Args) -> SessionConfig {
    let options = OpenOptions::new(args.adapter.as_str()).with_location(&args.dir);
    SessionConfig::new(args.name.as_str(), options)
}

/// Runs the demo `runs` times (at least once); `true` when any run failed.
fn run_demos(args: &Args) -> (Session, bool) {
    let mut session = Session::new(session_config(args));
    let mut failed = false;
    for _ in 0..args.runs.max(1) {
        match session.run_demo() {
            Ok(PopulateOutcome::Completed { .. }) => {}
            Ok(PopulateOutcome::Degraded { .. }) | Err(_) => failed = true,
        }
    }
    (session, failed)
}
