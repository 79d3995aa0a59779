//! FFI use-case API for Flutter-facing calls.
//!
//! # Responsibility
//! - Expose the docstore demo session to Dart via FRB.
//! - Render the session log as `{msg, key}` items for list views.
//!
//! # Invariants
//! - Exported functions must not panic across the FFI boundary.
//! - One session per process, guarded by a mutex so calls never interleave.
//! - Store failures are reported in the response envelope, never thrown.

use docstore_core::{
    core_version as core_version_inner, init_logging as init_logging_inner, ping as ping_inner,
    LogEntry, OpenOptions, PopulateOutcome, Session, SessionConfig, SessionState,
};
use docstore_core::session::demo::DEMO_STORE_NAME;
use docstore_core::store::SQLITE_ADAPTER_ID;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

const STORE_DIR_ENV: &str = "DOCSTORE_DIR";
const STORE_DIR_FALLBACK: &str = "docstore";
static DEMO_SESSION: OnceLock<Mutex<Option<Session>>> = OnceLock::new();

/// Minimal health-check API for FRB smoke integration.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Never throws; always returns a UTF-8 string.
#[flutter_rust_bridge::frb(sync)]
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Expose core crate version through FFI.
#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes Rust core logging once per process.
///
/// Input semantics:
/// - `level`: one of `trace|debug|info|warn|error` (case-insensitive).
/// - `log_dir`: absolute directory path where rolling logs are written.
///
/// # FFI contract
/// - Safe to call repeatedly with the same `level + log_dir`.
/// - Returns empty string on success and an error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err.to_string(),
    }
}

/// One rendered log row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoLogItem {
    /// Display text.
    pub msg: String,
    /// Stable list key.
    pub key: String,
}

/// Demo response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoRunResponse {
    /// Whether the requested operation completed.
    pub ok: bool,
    /// Human-readable result for diagnostics/UI.
    pub message: String,
    /// Full session log after the operation.
    pub entries: Vec<DemoLogItem>,
}

/// Runs the reset/subscribe/populate demo.
///
/// Input semantics:
/// - `store_dir`: directory for the store file. Blank falls back to
///   `DOCSTORE_DIR`, then to a `docstore` folder in the temp dir.
/// - `adapter`: adapter id; blank means `sqlite`.
///
/// A call with a different directory or adapter than the running session
/// replaces that session.
///
/// # FFI contract
/// - Sync call, DB-backed execution.
/// - Never panics.
#[flutter_rust_bridge::frb(sync)]
pub fn demo_run(store_dir: Option<String>, adapter: Option<String>) -> DemoRunResponse {
    let config = SessionConfig::new(
        DEMO_STORE_NAME,
        OpenOptions::new(normalize_adapter(adapter)).with_location(resolve_store_dir(store_dir)),
    );

    let mut slot = lock_session();
    if slot.as_ref().is_some_and(|session| session.target() != &config) {
        info!("event=demo_session_replace module=ffi status=ok");
        *slot = None;
    }
    let session = slot.get_or_insert_with(|| {
        let mut session = Session::new(config);
        session.add_log("Welcome");
        session
    });

    let (ok, message) = match session.run_demo() {
        Ok(PopulateOutcome::Completed { query }) => {
            (true, format!("Demo completed with {} row(s).", query.rows.len()))
        }
        Ok(PopulateOutcome::Degraded { step, reason }) => {
            (false, format!("demo_run degraded at {step}: {reason}"))
        }
        Err(err) => (false, format!("demo_run failed: {err}")),
    };
    if !ok {
        warn!("event=demo_run module=ffi status=error");
    }
    DemoRunResponse {
        ok,
        message,
        entries: render_entries(session.log().entries()),
    }
}

/// Returns the current session log, empty before the first run.
#[flutter_rust_bridge::frb(sync)]
pub fn demo_log() -> Vec<DemoLogItem> {
    lock_session()
        .as_ref()
        .map(|session| render_entries(session.log().entries()))
        .unwrap_or_default()
}

/// Destroys the demo store and ends the session.
///
/// # FFI contract
/// - Safe to call without a running session.
/// - Returns the final log of the ended session.
#[flutter_rust_bridge::frb(sync)]
pub fn demo_teardown() -> DemoRunResponse {
    let Some(mut session) = lock_session().take() else {
        return DemoRunResponse {
            ok: true,
            message: "No demo session.".to_string(),
            entries: Vec::new(),
        };
    };

    let result = match session.state() {
        SessionState::Open => session.destroy(),
        SessionState::Closed => Ok(()),
    };
    let (ok, message) = match result {
        Ok(()) => (true, "Demo store destroyed.".to_string()),
        Err(err) => {
            session.report_error(&err);
            (false, format!("demo_teardown failed: {err}"))
        }
    };
    DemoRunResponse {
        ok,
        message,
        entries: render_entries(session.log().entries()),
    }
}

fn lock_session() -> MutexGuard<'static, Option<Session>> {
    DEMO_SESSION
        .get_or_init(|| Mutex::new(None))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn resolve_store_dir(store_dir: Option<String>) -> PathBuf {
    let requested = store_dir
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty());
    if let Some(dir) = requested {
        return PathBuf::from(dir);
    }
    if let Ok(raw) = std::env::var(STORE_DIR_ENV) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    std::env::temp_dir().join(STORE_DIR_FALLBACK)
}

fn normalize_adapter(adapter: Option<String>) -> String {
    adapter
        .map(|raw| raw.trim().to_ascii_lowercase())
        .filter(|raw| !raw.is_empty())
        .unwrap_or_else(|| SQLITE_ADAPTER_ID.to_string())
}

fn render_entries(entries: &[LogEntry]) -> Vec<DemoLogItem> {
    entries
        .iter()
        .map(|entry| DemoLogItem {
            msg: entry.message.clone(),
            key: entry.key(),
        })
        .collect()
}
