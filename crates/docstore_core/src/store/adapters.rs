//! Built-in store adapters.
//!
//! - `sqlite`: one SQLite file per store name under the configured location.
//! - `memory`: in-memory SQLite; contents vanish when the handle is released.

use crate::store::lease::{LeaseTable, FILE_LEASES};
use crate::store::sqlite_store::SqliteStore;
use crate::store::{
    DocumentStore, OpenOptions, StoreAdapter, StoreError, StoreResult, MEMORY_ADAPTER_ID,
    SQLITE_ADAPTER_ID,
};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Rejects names that are empty or would escape the store location.
pub fn validate_store_name(name: &str) -> StoreResult<()> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed != name
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
    {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// File-backed SQLite adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteAdapter;

impl SqliteAdapter {
    fn resolve_path(name: &str, options: &OpenOptions) -> StoreResult<PathBuf> {
        let directory = match &options.location {
            Some(location) => location.clone(),
            None => std::env::current_dir()?,
        };
        std::fs::create_dir_all(&directory)?;
        Ok(std::path::absolute(directory.join(name))?)
    }
}

impl StoreAdapter for SqliteAdapter {
    fn adapter_id(&self) -> &str {
        SQLITE_ADAPTER_ID
    }

    fn open(&self, name: &str, options: &OpenOptions) -> StoreResult<Box<dyn DocumentStore>> {
        validate_store_name(name)?;
        let path = Self::resolve_path(name, options)?;
        let lease = FILE_LEASES.acquire(path_key(&path))?;
        let store = SqliteStore::open_file(name, &path, lease)?;
        info!("event=store_open module=store status=ok adapter={SQLITE_ADAPTER_ID}");
        Ok(Box::new(store))
    }
}

/// In-memory adapter. Names are exclusive per adapter instance.
#[derive(Debug, Default, Clone)]
pub struct MemoryAdapter {
    leases: Arc<LeaseTable>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreAdapter for MemoryAdapter {
    fn adapter_id(&self) -> &str {
        MEMORY_ADAPTER_ID
    }

    fn open(&self, name: &str, _options: &OpenOptions) -> StoreResult<Box<dyn DocumentStore>> {
        validate_store_name(name)?;
        let lease = self.leases.acquire(name.to_string())?;
        let store = SqliteStore::open_memory(name, lease)?;
        info!("event=store_open module=store status=ok adapter={MEMORY_ADAPTER_ID}");
        Ok(Box::new(store))
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
