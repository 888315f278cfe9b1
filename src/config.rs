//! Build-time database configuration (`spec.md §6`).

use std::sync::Arc;

use crate::plugin::Plugin;
use crate::schema::CollectionDescriptor;
use crate::storage::{KVStorage, MemoryStorage};

/// The enumerated build-time options of `spec.md §6`: collections (each
/// already carrying its `schema`, `relationships`, `computed`, `hooks`,
/// `uniqueFields`, `idGenerator`, `file`), an ordered plugin list, a
/// storage collaborator, and the persistence debounce window.
pub struct DatabaseConfig {
    pub collections: Vec<CollectionDescriptor>,
    pub plugins: Vec<Arc<dyn Plugin>>,
    pub storage: Arc<dyn KVStorage>,
    pub write_debounce_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            collections: Vec::new(),
            plugins: Vec::new(),
            storage: Arc::new(MemoryStorage::new()),
            write_debounce_ms: 200,
        }
    }
}

impl DatabaseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, descriptor: CollectionDescriptor) -> Self {
        self.collections.push(descriptor);
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn KVStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_write_debounce_ms(mut self, ms: u64) -> Self {
        self.write_debounce_ms = ms;
        self
    }
}
