use docstore_core::db::{
    latest_schema_version, open_backing, schema_version, upgrade_schema, SchemaError,
    StoreBacking,
};
use docstore_core::store::{AdapterRegistry, OpenOptions, StoreError};
use rusqlite::Connection;

#[test]
fn memory_backing_gets_the_full_document_schema() {
    let conn = open_backing(&StoreBacking::Memory).unwrap();

    assert_eq!(schema_version(&conn).unwrap(), latest_schema_version());
    assert_table_exists(&conn, "documents");
    assert_table_exists(&conn, "attachments");
    assert_table_exists(&conn, "changes");
}

#[test]
fn upgrade_reports_applied_steps_then_nothing_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let backing = StoreBacking::File(dir.path().join("mydb.db"));

    let mut conn = Connection::open(backing.path().unwrap()).unwrap();
    let first = upgrade_schema(&mut conn, &backing).unwrap();
    assert_eq!(first.from, 0);
    assert_eq!(first.to, latest_schema_version());
    assert_eq!(first.applied, vec!["documents", "changes"]);

    let second = upgrade_schema(&mut conn, &backing).unwrap();
    assert!(second.is_noop());
    assert_eq!(second.from, latest_schema_version());
}

#[test]
fn partially_upgraded_store_only_gets_missing_steps() {
    let dir = tempfile::tempdir().unwrap();
    let backing = StoreBacking::File(dir.path().join("old.db"));

    let conn = Connection::open(backing.path().unwrap()).unwrap();
    conn.execute_batch(include_str!("../src/db/migrations/0001_documents.sql"))
        .unwrap();
    conn.execute_batch("PRAGMA user_version = 1;").unwrap();
    drop(conn);

    let mut conn = Connection::open(backing.path().unwrap()).unwrap();
    let upgrade = upgrade_schema(&mut conn, &backing).unwrap();
    assert_eq!(upgrade.from, 1);
    assert_eq!(upgrade.applied, vec!["changes"]);
    assert_table_exists(&conn, "changes");
}

#[test]
fn reopening_a_store_file_keeps_schema_and_rows() {
    let dir = tempfile::tempdir().unwrap();
    let backing = StoreBacking::File(dir.path().join("mydb.db"));

    let conn = open_backing(&backing).unwrap();
    conn.execute(
        "INSERT INTO documents (id, rev, generation, body, is_deleted)
         VALUES ('a', '1-x', 1, '{}', 0);",
        [],
    )
    .unwrap();
    drop(conn);

    let conn = open_backing(&backing).unwrap();
    assert_eq!(schema_version(&conn).unwrap(), latest_schema_version());
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM documents;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn attachments_are_removed_with_their_document() {
    let conn = open_backing(&StoreBacking::Memory).unwrap();
    conn.execute_batch(
        "INSERT INTO documents (id, rev, generation, body, is_deleted)
         VALUES ('a', '1-x', 1, '{}', 0);
         INSERT INTO attachments (doc_id, name, content_type, digest, data)
         VALUES ('a', 'f.txt', 'text/plain', 'sha256-x', X'00');
         DELETE FROM documents WHERE id = 'a';",
    )
    .unwrap();

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM attachments;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn store_written_by_a_newer_schema_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_backing(&StoreBacking::File(path.clone())).unwrap_err();
    assert_eq!(err.code(), "db_newer_schema");
    match err {
        SchemaError::NewerSchema {
            backing,
            found,
            supported,
        } => {
            assert_eq!(backing.path(), Some(path.as_path()));
            assert_eq!(found, 999);
            assert_eq!(supported, latest_schema_version());
        }
        other => panic!("unexpected error: {other}"),
    }

    let options = OpenOptions::default().with_location(dir.path());
    let err = AdapterRegistry::with_builtin()
        .open("future.db", &options)
        .err()
        .unwrap();
    assert!(matches!(
        err,
        StoreError::Schema(SchemaError::NewerSchema { found: 999, .. })
    ));
    assert!(err.to_string().contains("newer than supported"));
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
