//! Schema registry
//!
//! Maps dataset keys to shared, immutable entries. Reads take a short read
//! lock and clone an `Arc`; a reload swaps the whole entry under the write
//! lock, so a reader holding a resolved entry keeps a consistent view even if
//! a reload lands mid-request.
//!
//! The registry is generic over its entry type: the core registers plain
//! [`DatasetDefinition`]s, the engine registers fully activated datasets.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{DatasetDefinition, Result, SchemaError};

/// Something addressable by a dataset key
pub trait RegistryEntry: Send + Sync {
    fn key(&self) -> &str;
}

impl RegistryEntry for DatasetDefinition {
    fn key(&self) -> &str {
        &self.key
    }
}

/// Registry of dataset entries keyed by dataset key
pub struct SchemaRegistry<E: RegistryEntry = DatasetDefinition> {
    entries: RwLock<HashMap<String, Arc<E>>>,
}

impl<E: RegistryEntry> Default for SchemaRegistry<E> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<E: RegistryEntry> SchemaRegistry<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new entry; fails if the key is already taken
    pub fn register(&self, entry: E) -> Result<Arc<E>> {
        let key = entry.key().to_string();
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            return Err(SchemaError::DuplicateDataset(key));
        }
        let entry = Arc::new(entry);
        entries.insert(key.clone(), Arc::clone(&entry));
        info!(dataset = %key, "Registered dataset");
        Ok(entry)
    }

    /// Resolve a dataset key
    pub fn resolve(&self, key: &str) -> Result<Arc<E>> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| SchemaError::DatasetNotFound(key.to_string()))
    }

    /// Atomically replace an existing entry, returning the previous one
    pub fn reload(&self, entry: E) -> Result<Arc<E>> {
        let key = entry.key().to_string();
        let mut entries = self.entries.write();
        let slot = entries
            .get_mut(&key)
            .ok_or_else(|| SchemaError::DatasetNotFound(key.clone()))?;
        let previous = std::mem::replace(slot, Arc::new(entry));
        info!(dataset = %key, "Reloaded dataset");
        Ok(previous)
    }

    /// Insert or replace; returns the previous entry if there was one
    pub fn upsert(&self, entry: E) -> Option<Arc<E>> {
        let key = entry.key().to_string();
        let previous = self.entries.write().insert(key.clone(), Arc::new(entry));
        debug!(dataset = %key, replaced = previous.is_some(), "Upserted dataset");
        previous
    }

    pub fn remove(&self, key: &str) -> Option<Arc<E>> {
        self.entries.write().remove(key)
    }

    /// Registered keys, sorted
    pub fn list(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Column, ColumnType, IntWidth, StorageKind};
    use std::thread;

    fn definition(key: &str, columns: &[&str]) -> DatasetDefinition {
        DatasetDefinition {
            key: key.to_string(),
            kind: StorageKind::ReadableStorage,
            storage_set: None,
            readiness_state: None,
            columns: columns
                .iter()
                .map(|name| Column::new(*name, ColumnType::UInt(IntWidth::W64)))
                .collect(),
            local_table_name: format!("{}_local", key),
            dist_table_name: format!("{}_dist", key),
            partition_format: vec![],
            query_processors: vec![],
            mandatory_condition_checkers: vec![],
            allocation_policies: vec![],
            stream_loader: None,
        }
    }

    #[test]
    fn test_resolve_returns_registered_columns() {
        let registry = SchemaRegistry::new();
        let input = definition("spans", &["organization_id", "span_id", "project_id"]);
        registry.register(input.clone()).unwrap();

        let resolved = registry.resolve("spans").unwrap();
        assert_eq!(resolved.columns, input.columns);
    }

    #[test]
    fn test_resolve_unknown() {
        let registry: SchemaRegistry = SchemaRegistry::new();
        assert!(matches!(
            registry.resolve("missing"),
            Err(SchemaError::DatasetNotFound(key)) if key == "missing"
        ));
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let registry = SchemaRegistry::new();
        registry.register(definition("spans", &["a"])).unwrap();
        assert!(matches!(
            registry.register(definition("spans", &["b"])),
            Err(SchemaError::DuplicateDataset(_))
        ));
        assert_eq!(registry.resolve("spans").unwrap().columns[0].name, "a");
    }

    #[test]
    fn test_reload_swaps_whole_entry() {
        let registry = SchemaRegistry::new();
        registry.register(definition("spans", &["a"])).unwrap();

        let held = registry.resolve("spans").unwrap();
        let previous = registry.reload(definition("spans", &["b", "c"])).unwrap();

        // Readers holding the old entry keep a consistent view
        assert_eq!(held.column_names(), vec!["a"]);
        assert_eq!(previous.column_names(), vec!["a"]);
        assert_eq!(registry.resolve("spans").unwrap().column_names(), vec!["b", "c"]);
    }

    #[test]
    fn test_reload_unknown_rejected() {
        let registry = SchemaRegistry::new();
        assert!(registry.reload(definition("spans", &["a"])).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_sorted() {
        let registry = SchemaRegistry::new();
        registry.register(definition("zeta", &["a"])).unwrap();
        registry.register(definition("alpha", &["a"])).unwrap();
        assert!(registry.upsert(definition("mid", &["a"])).is_none());
        assert_eq!(registry.list(), vec!["alpha", "mid", "zeta"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_concurrent_readers_never_see_mixed_definition() {
        let registry = Arc::new(SchemaRegistry::new());
        registry.register(definition("spans", &["a", "b"])).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let names = registry.resolve("spans").unwrap().column_names().join(",");
                        assert!(names == "a,b" || names == "x,y,z", "mixed view: {}", names);
                    }
                })
            })
            .collect();

        for i in 0..200 {
            let columns: &[&str] = if i % 2 == 0 { &["x", "y", "z"] } else { &["a", "b"] };
            registry.reload(definition("spans", columns)).unwrap();
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
