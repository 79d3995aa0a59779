//! SQLite-backed document store.
//!
//! # Responsibility
//! - Persist document revisions, attachments and the change log.
//! - Evaluate views over live documents.
//! - Fan committed changes out to live feeds.
//!
//! # Invariants
//! - Every write runs in one transaction that also appends to `changes`.
//! - Tombstones keep their row so revisions keep increasing after removal.
//! - Read paths reject malformed persisted bodies instead of masking them.

use crate::db::{open_backing, StoreBacking};
use crate::model::design::DesignDocument;
use crate::model::document::{
    attachment_digest, Attachment, AttachmentBody, Document, DocumentValidationError,
};
use crate::store::changes::{ChangeFeed, ChangeHub, ChangeNotification, StreamError};
use crate::store::lease::NameLease;
use crate::store::{
    AllDocsOptions, ChangesOptions, ChangesSince, DestroyRejected, DocumentStore, GetOptions,
    PutResponse, QueryOptions, QueryResponse, QueryRow, StoreError, StoreInfo, StoreResult,
    MEMORY_ADAPTER_ID, SQLITE_ADAPTER_ID,
};
use crate::view::{collate, resolve_view_name, MapProgram};
use log::{debug, error, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;

const UPSERT_DOCUMENT_SQL: &str = "INSERT INTO documents (id, rev, generation, body, is_deleted)
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT(id) DO UPDATE SET
        rev = excluded.rev,
        generation = excluded.generation,
        body = excluded.body,
        is_deleted = excluded.is_deleted,
        updated_at = (strftime('%s', 'now') * 1000);";

const STORE_FILE_SUFFIXES: &[&str] = &["", "-wal", "-shm", "-journal"];

/// Document store over one SQLite connection.
pub struct SqliteStore {
    conn: Connection,
    name: String,
    adapter_id: &'static str,
    backing: StoreBacking,
    hub: ChangeHub,
    // Declared last: released only after the connection is gone.
    lease: NameLease,
}

struct DocumentHead {
    rev: String,
    generation: u32,
    is_deleted: bool,
}

struct StoredAttachment {
    name: String,
    content_type: String,
    digest: String,
    data: Vec<u8>,
}

struct EmittedRow {
    id: String,
    key: Value,
    value: Value,
}

impl SqliteStore {
    pub(crate) fn open_file(name: &str, path: &Path, lease: NameLease) -> StoreResult<Self> {
        let backing = StoreBacking::File(path.to_path_buf());
        let conn = open_backing(&backing)?;
        Ok(Self {
            conn,
            name: name.to_string(),
            adapter_id: SQLITE_ADAPTER_ID,
            backing,
            hub: ChangeHub::default(),
            lease,
        })
    }

    pub(crate) fn open_memory(name: &str, lease: NameLease) -> StoreResult<Self> {
        let backing = StoreBacking::Memory;
        let conn = open_backing(&backing)?;
        Ok(Self {
            conn,
            name: name.to_string(),
            adapter_id: MEMORY_ADAPTER_ID,
            backing,
            hub: ChangeHub::default(),
            lease,
        })
    }

    fn write_revision(&mut self, doc: &Document) -> StoreResult<PutResponse> {
        let tx = self.conn.transaction()?;
        let head = load_head(&tx, &doc.id)?;
        check_expected_revision(&doc.id, doc.rev.as_deref(), head.as_ref())?;

        let attachments = if doc.deleted {
            Vec::new()
        } else {
            resolve_attachments(&tx, doc)?
        };
        let generation = head.as_ref().map_or(1, |head| head.generation + 1);
        let rev = new_revision(generation);
        let body = if doc.deleted {
            "{}".to_string()
        } else {
            serde_json::to_string(&doc.fields)?
        };

        tx.execute(
            UPSERT_DOCUMENT_SQL,
            params![
                doc.id.as_str(),
                rev.as_str(),
                generation,
                body,
                bool_to_int(doc.deleted)
            ],
        )?;
        tx.execute("DELETE FROM attachments WHERE doc_id = ?1;", [doc.id.as_str()])?;
        for attachment in &attachments {
            tx.execute(
                "INSERT INTO attachments (doc_id, name, content_type, digest, data)
                 VALUES (?1, ?2, ?3, ?4, ?5);",
                params![
                    doc.id.as_str(),
                    attachment.name.as_str(),
                    attachment.content_type.as_str(),
                    attachment.digest.as_str(),
                    attachment.data.as_slice(),
                ],
            )?;
        }
        tx.execute(
            "INSERT INTO changes (doc_id, rev, is_deleted) VALUES (?1, ?2, ?3);",
            params![doc.id.as_str(), rev.as_str(), bool_to_int(doc.deleted)],
        )?;
        let seq = tx.last_insert_rowid() as u64;
        tx.commit()?;

        self.publish(&ChangeNotification {
            seq,
            id: doc.id.clone(),
            rev: rev.clone(),
            deleted: doc.deleted,
            doc: None,
        });

        Ok(PutResponse {
            ok: true,
            id: doc.id.clone(),
            rev,
        })
    }

    fn publish(&mut self, change: &ChangeNotification) {
        let conn = &self.conn;
        self.hub.notify(change, || load_change_document(conn, change));
    }

    fn load_view_inputs(&self) -> StoreResult<Vec<Document>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, rev, body
             FROM documents
             WHERE is_deleted = 0 AND substr(id, 1, 8) != '_design/'
             ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut docs = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get("id")?;
            let body: String = row.get("body")?;
            let mut doc = Document::new(id.clone());
            doc.rev = Some(row.get("rev")?);
            doc.fields = parse_body(&id, &body)?;
            docs.push(doc);
        }
        Ok(docs)
    }

    fn rows_with_docs(
        &self,
        rows: impl Iterator<Item = EmittedRow>,
        include_docs: bool,
        attachments: bool,
    ) -> StoreResult<Vec<QueryRow>> {
        rows.map(|row| -> StoreResult<QueryRow> {
            let doc = if include_docs {
                load_document(&self.conn, &row.id, attachments)?
            } else {
                None
            };
            Ok(QueryRow {
                id: row.id,
                key: row.key,
                value: row.value,
                doc,
            })
        })
        .collect()
    }
}

impl DocumentStore for SqliteStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn adapter_id(&self) -> &str {
        self.adapter_id
    }

    fn put(&mut self, doc: &Document) -> StoreResult<PutResponse> {
        doc.validate()?;
        let started_at = Instant::now();
        let result = self.write_revision(doc);
        match &result {
            Ok(_) => info!(
                "event=doc_put module=store status=ok adapter={} duration_ms={}",
                self.adapter_id,
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=doc_put module=store status=error adapter={} duration_ms={} error={}",
                self.adapter_id,
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }

    fn get(&self, id: &str, options: &GetOptions) -> StoreResult<Option<Document>> {
        load_document(&self.conn, id, options.attachments)
    }

    fn remove(&mut self, id: &str, rev: &str) -> StoreResult<PutResponse> {
        match load_head(&self.conn, id)? {
            Some(head) if !head.is_deleted => {}
            _ => return Err(StoreError::NotFound(id.to_string())),
        }

        let mut tombstone = Document::new(id);
        tombstone.rev = Some(rev.to_string());
        tombstone.deleted = true;
        self.put(&tombstone)
    }

    fn all_docs(&self, options: &AllDocsOptions) -> StoreResult<QueryResponse> {
        let mut stmt = self.conn.prepare(
            "SELECT id, rev FROM documents WHERE is_deleted = 0 ORDER BY id ASC;",
        )?;
        let listed = stmt
            .query_map([], |row| {
                let id: String = row.get("id")?;
                let rev: String = row.get("rev")?;
                Ok(EmittedRow {
                    key: Value::String(id.clone()),
                    value: json!({ "rev": rev }),
                    id,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let total_rows = listed.len() as u64;
        let rows = self.rows_with_docs(
            listed.into_iter(),
            options.include_docs,
            options.attachments,
        )?;
        Ok(QueryResponse {
            total_rows,
            offset: 0,
            rows,
        })
    }

    fn query(&self, view: &str, options: &QueryOptions) -> StoreResult<QueryResponse> {
        let started_at = Instant::now();
        let (design_id, view_name) =
            resolve_view_name(view).ok_or_else(|| StoreError::InvalidView {
                view: view.to_string(),
                message: "expected `<design>/<view>` or `<name>`".to_string(),
            })?;
        let design_doc = load_document(&self.conn, &design_id, false)?
            .ok_or_else(|| StoreError::NotFound(design_id.clone()))?;
        let design = DesignDocument::from_document(&design_doc)?;
        let definition = design
            .views
            .get(&view_name)
            .ok_or_else(|| StoreError::InvalidView {
                view: view.to_string(),
                message: format!("view `{view_name}` is not defined in `{design_id}`"),
            })?;
        let program = MapProgram::compile(&definition.map).map_err(|err| StoreError::InvalidView {
            view: view.to_string(),
            message: err.to_string(),
        })?;

        let mut emitted = Vec::new();
        for doc in self.load_view_inputs()? {
            for (key, value) in program.run(&doc) {
                emitted.push(EmittedRow {
                    id: doc.id.clone(),
                    key,
                    value,
                });
            }
        }
        emitted.sort_by(|a, b| collate(&a.key, &b.key).then_with(|| a.id.cmp(&b.id)));
        let total_rows = emitted.len() as u64;

        if let Some(key) = &options.key {
            emitted.retain(|row| collate(&row.key, key) == Ordering::Equal);
        }
        if options.descending {
            emitted.reverse();
        }
        let limit = options.limit.map_or(usize::MAX, |limit| limit as usize);
        let selected = emitted
            .into_iter()
            .skip(options.skip as usize)
            .take(limit);
        let rows = self.rows_with_docs(selected, options.include_docs, options.attachments)?;

        debug!(
            "event=view_query module=store status=ok rows={} total_rows={} duration_ms={}",
            rows.len(),
            total_rows,
            started_at.elapsed().as_millis()
        );
        Ok(QueryResponse {
            total_rows,
            offset: u64::from(options.skip),
            rows,
        })
    }

    fn changes(&mut self, options: &ChangesOptions) -> StoreResult<ChangeFeed> {
        let (sender, feed) = ChangeFeed::channel();

        if let ChangesSince::Seq(since) = options.since {
            for change in load_changes_since(&self.conn, since)? {
                let event = if options.include_docs {
                    load_change_document(&self.conn, &change)
                        .map(|doc| ChangeNotification { doc, ..change })
                        .map_err(StreamError::from)
                } else {
                    Ok(change)
                };
                // The receiver is owned by `feed` in this scope.
                let _ = sender.send(event);
            }
        }

        if options.live {
            self.hub.attach(sender, options.include_docs);
        }
        info!(
            "event=changes_subscribe module=store status=ok adapter={} live={} include_docs={} subscribers={}",
            self.adapter_id,
            options.live,
            options.include_docs,
            self.hub.subscriber_count()
        );
        Ok(feed)
    }

    fn info(&self) -> StoreResult<StoreInfo> {
        let doc_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE is_deleted = 0;",
            [],
            |row| row.get(0),
        )?;
        let update_seq: i64 =
            self.conn
                .query_row("SELECT COALESCE(MAX(seq), 0) FROM changes;", [], |row| {
                    row.get(0)
                })?;
        Ok(StoreInfo {
            db_name: self.name.clone(),
            adapter: self.adapter_id.to_string(),
            doc_count: doc_count as u64,
            update_seq: update_seq as u64,
        })
    }

    fn close(self: Box<Self>) -> StoreResult<()> {
        let mut this = *self;
        this.hub.close();
        let SqliteStore {
            conn, adapter_id, ..
        } = this;
        conn.close().map_err(|(_, err)| StoreError::from(err))?;
        info!("event=store_close module=store status=ok adapter={adapter_id}");
        Ok(())
    }

    fn destroy(self: Box<Self>) -> Result<(), DestroyRejected> {
        let mut this = *self;
        let started_at = Instant::now();
        info!(
            "event=store_destroy module=store status=start adapter={}",
            this.adapter_id
        );

        if !this.conn.is_autocommit() {
            warn!(
                "event=store_destroy module=store status=error adapter={} error_code=write_in_flight",
                this.adapter_id
            );
            return Err(DestroyRejected::new(Box::new(this), StoreError::WriteInFlight));
        }
        if let Err(err) = wipe_contents(&mut this.conn) {
            error!(
                "event=store_destroy module=store status=error adapter={} error_code=wipe_failed error={}",
                this.adapter_id, err
            );
            return Err(DestroyRejected::new(Box::new(this), err));
        }

        let SqliteStore {
            conn,
            name,
            adapter_id,
            backing,
            mut hub,
            lease,
        } = this;
        if let Err((conn, err)) = conn.close() {
            error!(
                "event=store_destroy module=store status=error adapter={adapter_id} error_code=close_failed error={err}"
            );
            let store = SqliteStore {
                conn,
                name,
                adapter_id,
                backing,
                hub,
                lease,
            };
            return Err(DestroyRejected::new(Box::new(store), err.into()));
        }
        // Feeds stay attached while the handle can still be handed back.
        hub.close();

        if let Some(path) = backing.path() {
            if let Err(err) = remove_store_files(path) {
                // Content is already wiped; a leftover empty file is harmless.
                warn!(
                    "event=store_destroy module=store status=degraded adapter={adapter_id} error_code=file_remove_failed error={err}"
                );
            }
        }
        drop(lease);

        info!(
            "event=store_destroy module=store status=ok adapter={adapter_id} duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(())
    }
}

fn load_head(conn: &Connection, id: &str) -> StoreResult<Option<DocumentHead>> {
    let head = conn
        .query_row(
            "SELECT rev, generation, is_deleted FROM documents WHERE id = ?1;",
            [id],
            |row| {
                Ok(DocumentHead {
                    rev: row.get("rev")?,
                    generation: row.get("generation")?,
                    is_deleted: row.get::<_, i64>("is_deleted")? == 1,
                })
            },
        )
        .optional()?;
    Ok(head)
}

fn check_expected_revision(
    id: &str,
    expected: Option<&str>,
    head: Option<&DocumentHead>,
) -> StoreResult<()> {
    match (expected, head) {
        (Some(expected), Some(head)) if head.rev != expected => Err(StoreError::Conflict {
            id: id.to_string(),
        }),
        (Some(_), None) => Err(StoreError::Conflict { id: id.to_string() }),
        _ => Ok(()),
    }
}

fn resolve_attachments(conn: &Connection, doc: &Document) -> StoreResult<Vec<StoredAttachment>> {
    let mut resolved = Vec::with_capacity(doc.attachments.len());
    for (name, attachment) in &doc.attachments {
        let (digest, data) = match &attachment.body {
            AttachmentBody::Inline(data) => (attachment_digest(data), data.clone()),
            AttachmentBody::Stub { digest, .. } => {
                let stored = conn
                    .query_row(
                        "SELECT digest, data FROM attachments WHERE doc_id = ?1 AND name = ?2;",
                        params![doc.id.as_str(), name.as_str()],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)),
                    )
                    .optional()?;
                match stored {
                    Some((stored_digest, data)) if stored_digest == *digest => (stored_digest, data),
                    _ => {
                        return Err(
                            DocumentValidationError::UnknownAttachmentStub(name.clone()).into()
                        );
                    }
                }
            }
        };
        resolved.push(StoredAttachment {
            name: name.clone(),
            content_type: attachment.content_type.clone(),
            digest,
            data,
        });
    }
    Ok(resolved)
}

fn load_document(conn: &Connection, id: &str, inline: bool) -> StoreResult<Option<Document>> {
    let row = conn
        .query_row(
            "SELECT rev, body, is_deleted FROM documents WHERE id = ?1;",
            [id],
            |row| {
                Ok((
                    row.get::<_, String>("rev")?,
                    row.get::<_, String>("body")?,
                    row.get::<_, i64>("is_deleted")?,
                ))
            },
        )
        .optional()?;

    let Some((rev, body, is_deleted)) = row else {
        return Ok(None);
    };
    match is_deleted {
        0 => {}
        1 => return Ok(None),
        other => {
            return Err(StoreError::InvalidData(format!(
                "invalid is_deleted value `{other}` for document `{id}`"
            )));
        }
    }

    let mut doc = Document::new(id);
    doc.rev = Some(rev);
    doc.fields = parse_body(id, &body)?;
    doc.attachments = load_attachments(conn, id, inline)?
        .into_iter()
        .collect();
    Ok(Some(doc))
}

fn load_attachments(
    conn: &Connection,
    doc_id: &str,
    inline: bool,
) -> StoreResult<Vec<(String, Attachment)>> {
    let mut stmt = conn.prepare(
        "SELECT name, content_type, digest, length(data) AS length,
                CASE WHEN ?2 = 1 THEN data ELSE NULL END AS data
         FROM attachments
         WHERE doc_id = ?1
         ORDER BY name ASC;",
    )?;
    let mut rows = stmt.query(params![doc_id, bool_to_int(inline)])?;
    let mut attachments = Vec::new();

    while let Some(row) = rows.next()? {
        let name: String = row.get("name")?;
        let body = match row.get::<_, Option<Vec<u8>>>("data")? {
            Some(data) => AttachmentBody::Inline(data),
            None => AttachmentBody::Stub {
                digest: row.get("digest")?,
                length: row.get::<_, i64>("length")? as u64,
            },
        };
        attachments.push((
            name,
            Attachment {
                content_type: row.get("content_type")?,
                body,
            },
        ));
    }

    Ok(attachments)
}

fn load_change_document(
    conn: &Connection,
    change: &ChangeNotification,
) -> StoreResult<Option<Document>> {
    if change.deleted {
        let mut tombstone = Document::new(change.id.clone());
        tombstone.rev = Some(change.rev.clone());
        tombstone.deleted = true;
        return Ok(Some(tombstone));
    }
    load_document(conn, &change.id, false)
}

fn load_changes_since(conn: &Connection, since: u64) -> StoreResult<Vec<ChangeNotification>> {
    let mut stmt = conn.prepare(
        "SELECT c.seq, c.doc_id, c.rev, c.is_deleted
         FROM changes c
         WHERE c.seq > ?1
           AND c.seq = (SELECT MAX(seq) FROM changes WHERE doc_id = c.doc_id)
         ORDER BY c.seq ASC;",
    )?;
    let since = i64::try_from(since).unwrap_or(i64::MAX);
    let changes = stmt
        .query_map([since], |row| {
            Ok(ChangeNotification {
                seq: row.get::<_, i64>(0)? as u64,
                id: row.get(1)?,
                rev: row.get(2)?,
                deleted: row.get::<_, i64>(3)? == 1,
                doc: None,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(changes)
}

fn parse_body(id: &str, body: &str) -> StoreResult<Map<String, Value>> {
    serde_json::from_str::<Map<String, Value>>(body)
        .map_err(|err| StoreError::InvalidData(format!("body of document `{id}`: {err}")))
}

fn wipe_contents(conn: &mut Connection) -> StoreResult<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "DELETE FROM attachments;
         DELETE FROM documents;
         DELETE FROM changes;
         DELETE FROM sqlite_sequence WHERE name = 'changes';",
    )?;
    tx.commit()?;
    Ok(())
}

fn remove_store_files(path: &Path) -> std::io::Result<()> {
    for suffix in STORE_FILE_SUFFIXES {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(suffix);
        match std::fs::remove_file(PathBuf::from(candidate)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn new_revision(generation: u32) -> String {
    format!("{generation}-{}", Uuid::new_v4().simple())
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
