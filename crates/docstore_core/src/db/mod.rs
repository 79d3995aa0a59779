//! SQLite backing and schema versions for document stores.
//!
//! # Responsibility
//! - Open the connection behind one store, file or in-memory.
//! - Bring the document schema up to date before a store sees the connection.
//!
//! # Invariants
//! - Schema version lives in `PRAGMA user_version`.
//! - A store file written by a newer schema is refused, never downgraded.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub mod migrations;
mod open;

pub use migrations::{latest_schema_version, schema_version, upgrade_schema, SchemaUpgrade};
pub use open::open_backing;

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Where the SQLite connection of a store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBacking {
    File(PathBuf),
    Memory,
}

impl StoreBacking {
    /// `file` or `memory`, used in log lines.
    pub fn mode(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Memory => "memory",
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path.as_path()),
            Self::Memory => None,
        }
    }
}

impl Display for StoreBacking {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Memory => f.write_str(":memory:"),
        }
    }
}

/// Failure to produce a migrated connection for a store.
#[derive(Debug)]
pub enum SchemaError {
    Connect {
        backing: StoreBacking,
        source: rusqlite::Error,
    },
    Upgrade {
        backing: StoreBacking,
        version: u32,
        source: rusqlite::Error,
    },
    /// The store was written by a build with a newer document schema.
    NewerSchema {
        backing: StoreBacking,
        found: u32,
        supported: u32,
    },
}

impl SchemaError {
    /// Stable code for `error_code=` log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "db_connect_failed",
            Self::Upgrade { .. } => "db_upgrade_failed",
            Self::NewerSchema { .. } => "db_newer_schema",
        }
    }

    pub fn backing(&self) -> &StoreBacking {
        match self {
            Self::Connect { backing, .. }
            | Self::Upgrade { backing, .. }
            | Self::NewerSchema { backing, .. } => backing,
        }
    }
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect { backing, source } => {
                write!(f, "cannot open store backing `{backing}`: {source}")
            }
            Self::Upgrade {
                backing,
                version,
                source,
            } => write!(
                f,
                "cannot upgrade store `{backing}` to schema {version}: {source}"
            ),
            Self::NewerSchema {
                backing,
                found,
                supported,
            } => write!(
                f,
                "store `{backing}` has schema version {found}, newer than supported {supported}"
            ),
        }
    }
}

impl Error for SchemaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Connect { source, .. } | Self::Upgrade { source, .. } => Some(source),
            Self::NewerSchema { .. } => None,
        }
    }
}
