//! Adapter registry and selection by id.

use crate::store::adapters::{MemoryAdapter, SqliteAdapter};
use crate::store::{DocumentStore, OpenOptions, StoreAdapter, StoreError, StoreResult};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Adapter registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterRegistryError {
    InvalidAdapterId(String),
    DuplicateAdapterId(String),
}

impl Display for AdapterRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAdapterId(value) => write!(f, "adapter id is invalid: {value}"),
            Self::DuplicateAdapterId(value) => write!(f, "adapter id already registered: {value}"),
        }
    }
}

impl Error for AdapterRegistryError {}

/// Runtime registry of store backends.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn StoreAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `sqlite` and `memory` adapters.
    pub fn with_builtin() -> Self {
        let mut adapters: BTreeMap<String, Arc<dyn StoreAdapter>> = BTreeMap::new();
        for adapter in [
            Arc::new(SqliteAdapter) as Arc<dyn StoreAdapter>,
            Arc::new(MemoryAdapter::new()) as Arc<dyn StoreAdapter>,
        ] {
            adapters.insert(adapter.adapter_id().to_string(), adapter);
        }
        Self { adapters }
    }

    /// Registers one adapter under its own id.
    pub fn register(&mut self, adapter: Arc<dyn StoreAdapter>) -> Result<(), AdapterRegistryError> {
        let adapter_id = adapter.adapter_id().trim().to_string();
        if !is_valid_adapter_id(&adapter_id) {
            return Err(AdapterRegistryError::InvalidAdapterId(adapter_id));
        }
        if self.adapters.contains_key(adapter_id.as_str()) {
            return Err(AdapterRegistryError::DuplicateAdapterId(adapter_id));
        }

        self.adapters.insert(adapter_id, adapter);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Returns sorted adapter ids.
    pub fn adapter_ids(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn get(&self, adapter_id: &str) -> Option<Arc<dyn StoreAdapter>> {
        self.adapters.get(adapter_id.trim()).cloned()
    }

    /// Opens `name` through the adapter named by `options.adapter`.
    pub fn open(&self, name: &str, options: &OpenOptions) -> StoreResult<Box<dyn DocumentStore>> {
        let adapter = self
            .get(&options.adapter)
            .ok_or_else(|| StoreError::UnsupportedAdapter(options.adapter.clone()))?;
        adapter.open(name, options)
    }
}

fn is_valid_adapter_id(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::{AdapterRegistry, AdapterRegistryError};
    use crate::store::{
        DocumentStore, MemoryAdapter, OpenOptions, StoreAdapter, StoreError, StoreResult,
    };
    use std::sync::Arc;

    struct NamedAdapter(&'static str);

    impl StoreAdapter for NamedAdapter {
        fn adapter_id(&self) -> &str {
            self.0
        }

        fn open(&self, name: &str, options: &OpenOptions) -> StoreResult<Box<dyn DocumentStore>> {
            MemoryAdapter::new().open(name, options)
        }
    }

    #[test]
    fn builtin_registry_lists_sorted_ids() {
        let registry = AdapterRegistry::with_builtin();
        assert_eq!(registry.adapter_ids(), vec!["memory", "sqlite"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn register_rejects_invalid_and_duplicate_ids() {
        let mut registry = AdapterRegistry::with_builtin();
        assert_eq!(
            registry.register(Arc::new(NamedAdapter("Bad Id"))),
            Err(AdapterRegistryError::InvalidAdapterId("Bad Id".to_string()))
        );
        assert_eq!(
            registry.register(Arc::new(NamedAdapter("memory"))),
            Err(AdapterRegistryError::DuplicateAdapterId("memory".to_string()))
        );
        registry.register(Arc::new(NamedAdapter("custom-1"))).unwrap();
        assert!(registry.get("custom-1").is_some());
    }

    #[test]
    fn open_with_unknown_adapter_is_unsupported() {
        let registry = AdapterRegistry::new();
        assert!(registry.is_empty());
        let err = registry
            .open("mydb.db", &OpenOptions::new("react-native-sqlite"))
            .err()
            .expect("unknown adapter should fail");
        assert!(matches!(err, StoreError::UnsupportedAdapter(id) if id == "react-native-sqlite"));
    }
}
