//! Document schema steps, applied oldest first.

use crate::db::{SchemaError, SchemaResult, StoreBacking};
use rusqlite::Connection;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "documents",
        sql: include_str!("0001_documents.sql"),
    },
    Migration {
        version: 2,
        name: "changes",
        sql: include_str!("0002_changes.sql"),
    },
];

/// Schema change made while opening a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaUpgrade {
    pub from: u32,
    pub to: u32,
    /// Names of the applied steps, oldest first.
    pub applied: Vec<&'static str>,
}

impl SchemaUpgrade {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Newest document schema this build can read and write.
pub fn latest_schema_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

pub fn schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))
}

/// Applies every step newer than the stored version in one transaction.
///
/// # Errors
/// - `NewerSchema` when the store is ahead of this build.
/// - `Upgrade` naming the step that failed; nothing is applied then.
pub fn upgrade_schema(
    conn: &mut Connection,
    backing: &StoreBacking,
) -> SchemaResult<SchemaUpgrade> {
    let from = schema_version(conn).map_err(|source| SchemaError::Connect {
        backing: backing.clone(),
        source,
    })?;
    let supported = latest_schema_version();
    if from > supported {
        return Err(SchemaError::NewerSchema {
            backing: backing.clone(),
            found: from,
            supported,
        });
    }

    let pending: Vec<&Migration> = MIGRATIONS
        .iter()
        .filter(|migration| migration.version > from)
        .collect();
    if pending.is_empty() {
        return Ok(SchemaUpgrade {
            from,
            to: from,
            applied: Vec::new(),
        });
    }

    let upgrade_failed = |version: u32, source: rusqlite::Error| SchemaError::Upgrade {
        backing: backing.clone(),
        version,
        source,
    };
    let tx = conn
        .transaction()
        .map_err(|source| upgrade_failed(supported, source))?;
    for migration in &pending {
        tx.execute_batch(migration.sql)
            .and_then(|()| tx.pragma_update(None, "user_version", migration.version))
            .map_err(|source| upgrade_failed(migration.version, source))?;
    }
    tx.commit()
        .map_err(|source| upgrade_failed(supported, source))?;

    Ok(SchemaUpgrade {
        from,
        to: supported,
        applied: pending.iter().map(|migration| migration.name).collect(),
    })
}
