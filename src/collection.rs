//! Collection state (C2, `spec.md §4.2`).
//!
//! Each collection owns a cell holding `entries: im::HashMap<id, Entity>`.
//! `im::HashMap` gives structurally-shared, cheap-to-clone snapshots so a
//! reader can take one atomic read of the `Arc`-backed map and then run the
//! entire query pipeline lock-free, while a writer computes the whole next
//! map functionally and swaps it in under one write-lock critical section.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::value::{FieldMap, QueryValue};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        EntityId(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

/// A stored entity: a field map that always contains an `"id"` key.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity(pub FieldMap);

impl Entity {
    pub fn id(&self) -> EntityId {
        match self.0.get("id") {
            Some(QueryValue::Text(s)) => EntityId(s.clone()),
            _ => EntityId(String::new()),
        }
    }

    pub fn get(&self, field: &str) -> Option<&QueryValue> {
        self.0.get(field)
    }

    pub fn deleted_at(&self) -> Option<&QueryValue> {
        self.0.get("deletedAt").filter(|v| !v.is_null())
    }

    pub fn is_soft_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }

    pub fn fields(&self) -> &FieldMap {
        &self.0
    }
}

/// The authoritative in-memory state for one collection.
pub struct CollectionState {
    entries: RwLock<im::HashMap<EntityId, Arc<Entity>>>,
}

impl CollectionState {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(im::HashMap::new()),
        }
    }

    pub fn from_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        let mut map = im::HashMap::new();
        for entity in entities {
            map.insert(entity.id(), Arc::new(entity));
        }
        Self {
            entries: RwLock::new(map),
        }
    }

    /// Take a consistent, cheap-to-clone snapshot of the collection.
    pub fn read(&self) -> im::HashMap<EntityId, Arc<Entity>> {
        self.entries.read().clone()
    }

    /// Compute `next = fn(current)` and publish it atomically. `fn` runs
    /// while holding the write lock, so it must not suspend (per
    /// `spec.md §5`: no suspension inside the pure pipeline stages; callers
    /// that need hooks must run them before calling `update`).
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(im::HashMap<EntityId, Arc<Entity>>) -> im::HashMap<EntityId, Arc<Entity>>,
    {
        let mut guard = self.entries.write();
        let current = guard.clone();
        *guard = f(current);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CollectionState {
    fn default() -> Self {
        Self::new()
    }
}
