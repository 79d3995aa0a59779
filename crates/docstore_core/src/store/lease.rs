//! Store name leases.
//!
//! A lease marks one store key as held by a live handle. Keys are released
//! when the lease drops, so every exit path of a handle gives the name back.

use crate::store::{StoreError, StoreResult};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Process-wide table for file-backed stores, keyed by absolute path.
pub(crate) static FILE_LEASES: Lazy<Arc<LeaseTable>> = Lazy::new(|| Arc::new(LeaseTable::default()));

#[derive(Debug, Default)]
pub(crate) struct LeaseTable {
    held: Mutex<HashSet<String>>,
}

impl LeaseTable {
    /// Acquires `key`, failing with `NameInUse` while another lease holds it.
    pub(crate) fn acquire(self: &Arc<Self>, key: String) -> StoreResult<NameLease> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(key.clone()) {
            return Err(StoreError::NameInUse(key));
        }
        Ok(NameLease {
            table: Arc::clone(self),
            key,
        })
    }

    #[cfg(test)]
    pub(crate) fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

#[derive(Debug)]
pub(crate) struct NameLease {
    table: Arc<LeaseTable>,
    key: String,
}

impl Drop for NameLease {
    fn drop(&mut self) {
        self.table
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::LeaseTable;
    use crate::store::StoreError;
    use std::sync::Arc;

    #[test]
    fn second_acquire_fails_until_first_lease_drops() {
        let table = Arc::new(LeaseTable::default());
        let lease = table.acquire("mydb.db".to_string()).unwrap();
        assert!(table.is_held("mydb.db"));

        let err = table.acquire("mydb.db".to_string()).unwrap_err();
        assert!(matches!(err, StoreError::NameInUse(name) if name == "mydb.db"));

        drop(lease);
        assert!(!table.is_held("mydb.db"));
        table.acquire("mydb.db".to_string()).unwrap();
    }
}
