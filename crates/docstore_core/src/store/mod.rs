//! Document store contracts and built-in backends.
//!
//! # Responsibility
//! - Define the `DocumentStore` handle contract the session drives.
//! - Define `StoreAdapter` so backends are selected by the `adapter` option.
//! - Keep SQL details inside the SQLite-backed implementation.
//!
//! # Invariants
//! - Write paths validate documents before SQL mutations.
//! - Change notifications are fanned out only after commit.
//! - A handle owns its name lease until it is closed, destroyed or dropped.

use crate::db::SchemaError;
use crate::model::document::{Document, DocumentValidationError};
use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::path::PathBuf;

mod adapters;
pub mod changes;
mod lease;
pub mod registry;
mod sqlite_store;

pub use adapters::{validate_store_name, MemoryAdapter, SqliteAdapter};
pub use changes::{ChangeEvent, ChangeFeed, ChangeNotification, FeedPoll, StreamError};
pub use registry::{AdapterRegistry, AdapterRegistryError};
pub use sqlite_store::SqliteStore;

/// Adapter id of the file-backed SQLite backend.
pub const SQLITE_ADAPTER_ID: &str = "sqlite";
/// Adapter id of the in-memory SQLite backend.
pub const MEMORY_ADAPTER_ID: &str = "memory";

pub type StoreResult<T> = Result<T, StoreError>;

/// Error for store acquisition, document writes, queries and teardown.
#[derive(Debug)]
pub enum StoreError {
    /// Backing could not be opened or its schema is unusable.
    Schema(SchemaError),
    Sqlite(rusqlite::Error),
    Validation(DocumentValidationError),
    /// Supplied `_rev` does not match the stored revision.
    Conflict { id: String },
    NotFound(String),
    InvalidView { view: String, message: String },
    InvalidName(String),
    UnsupportedAdapter(String),
    /// Another live handle already holds this store.
    NameInUse(String),
    /// A transaction is still open on the handle.
    WriteInFlight,
    Io(std::io::Error),
    Json(serde_json::Error),
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Schema(err) => write!(f, "{err}"),
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Conflict { id } => write!(f, "document update conflict: {id}"),
            Self::NotFound(id) => write!(f, "missing: {id}"),
            Self::InvalidView { view, message } => write!(f, "invalid view `{view}`: {message}"),
            Self::InvalidName(name) => write!(f, "invalid store name `{name}`"),
            Self::UnsupportedAdapter(adapter) => write!(f, "unsupported adapter `{adapter}`"),
            Self::NameInUse(name) => write!(f, "store `{name}` is already open"),
            Self::WriteInFlight => write!(f, "a write is still in flight"),
            Self::Io(err) => write!(f, "{err}"),
            Self::Json(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid stored data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Schema(err) => Some(err),
            Self::Sqlite(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SchemaError> for StoreError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<DocumentValidationError> for StoreError {
    fn from(value: DocumentValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Destroy was rejected; the still-open handle is handed back.
pub struct DestroyRejected {
    pub store: Box<dyn DocumentStore>,
    pub error: StoreError,
}

impl DestroyRejected {
    pub fn new(store: Box<dyn DocumentStore>, error: StoreError) -> Self {
        Self { store, error }
    }

    pub fn into_parts(self) -> (Box<dyn DocumentStore>, StoreError) {
        (self.store, self.error)
    }
}

impl Debug for DestroyRejected {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestroyRejected")
            .field("store", &self.store.name())
            .field("error", &self.error)
            .finish()
    }
}

/// Options recognized when opening a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    /// Backend id, resolved through [`AdapterRegistry`].
    pub adapter: String,
    /// Directory for file-backed adapters; the working directory when `None`.
    pub location: Option<PathBuf>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            adapter: SQLITE_ADAPTER_ID.to_string(),
            location: None,
        }
    }
}

impl OpenOptions {
    pub fn new(adapter: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = Some(location.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Return attachment bytes inline instead of stubs.
    pub attachments: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllDocsOptions {
    pub include_docs: bool,
    pub attachments: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub include_docs: bool,
    /// Inline attachment bytes in included docs.
    pub attachments: bool,
    /// Only rows whose key collates equal to this key.
    pub key: Option<Value>,
    pub descending: bool,
    pub skip: u32,
    pub limit: Option<u32>,
}

/// Where a change feed starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChangesSince {
    /// Only changes committed after the feed is created.
    #[default]
    Now,
    /// Replay changes with `seq` greater than this value first.
    Seq(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangesOptions {
    pub since: ChangesSince,
    pub include_docs: bool,
    /// Keep the feed open for future commits.
    pub live: bool,
}

impl Default for ChangesOptions {
    fn default() -> Self {
        Self {
            since: ChangesSince::Now,
            include_docs: false,
            live: true,
        }
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PutResponse {
    pub ok: bool,
    pub id: String,
    pub rev: String,
}

/// One row of a view query or `all_docs` listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRow {
    pub id: String,
    pub key: Value,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<Document>,
}

/// View query / `all_docs` result envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub total_rows: u64,
    pub offset: u64,
    pub rows: Vec<QueryRow>,
}

/// Store metadata snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreInfo {
    pub db_name: String,
    pub adapter: String,
    pub doc_count: u64,
    pub update_seq: u64,
}

/// Backend factory selected by the `adapter` open option.
pub trait StoreAdapter: Send + Sync {
    fn adapter_id(&self) -> &str;
    fn open(&self, name: &str, options: &OpenOptions) -> StoreResult<Box<dyn DocumentStore>>;
}

/// Live handle to one named document store.
pub trait DocumentStore: Send {
    fn name(&self) -> &str;
    fn adapter_id(&self) -> &str;
    /// Insert-or-replace. A supplied `_rev` must match the stored revision.
    fn put(&mut self, doc: &Document) -> StoreResult<PutResponse>;
    /// Returns the live revision, or `None` for missing and deleted ids.
    fn get(&self, id: &str, options: &GetOptions) -> StoreResult<Option<Document>>;
    /// Tombstones a document at the given revision.
    fn remove(&mut self, id: &str, rev: &str) -> StoreResult<PutResponse>;
    fn all_docs(&self, options: &AllDocsOptions) -> StoreResult<QueryResponse>;
    fn query(&self, view: &str, options: &QueryOptions) -> StoreResult<QueryResponse>;
    fn changes(&mut self, options: &ChangesOptions) -> StoreResult<ChangeFeed>;
    fn info(&self) -> StoreResult<StoreInfo>;
    /// Releases the handle, keeping persisted content.
    fn close(self: Box<Self>) -> StoreResult<()>;
    /// Deletes all persisted content and releases the handle.
    fn destroy(self: Box<Self>) -> Result<(), DestroyRejected>;
}
