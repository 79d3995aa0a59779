use super::migrations::upgrade_schema;
use super::{SchemaError, SchemaResult, StoreBacking};
use log::{error, info};
use rusqlite::Connection;
use std::time::{Duration, Instant};

/// Opens the connection for `backing` with the document schema applied.
///
/// File backings are created when missing. Emits `db_open` events with the
/// schema versions before and after.
pub fn open_backing(backing: &StoreBacking) -> SchemaResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={}", backing.mode());

    let opened = connect(backing).and_then(|mut conn| {
        let upgrade = upgrade_schema(&mut conn, backing)?;
        Ok((conn, upgrade))
    });
    match opened {
        Ok((conn, upgrade)) => {
            info!(
                "event=db_open module=db status=ok mode={} schema_from={} schema_to={} applied={} duration_ms={}",
                backing.mode(),
                upgrade.from,
                upgrade.to,
                upgrade.applied.len(),
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code={} error={}",
                backing.mode(),
                started_at.elapsed().as_millis(),
                err.code(),
                err
            );
            Err(err)
        }
    }
}

fn connect(backing: &StoreBacking) -> SchemaResult<Connection> {
    let conn = match backing {
        StoreBacking::File(path) => Connection::open(path),
        StoreBacking::Memory => Connection::open_in_memory(),
    };
    conn.and_then(|conn| {
        // Attachments cascade with their document.
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    })
    .map_err(|source| SchemaError::Connect {
        backing: backing.clone(),
        source,
    })
}
