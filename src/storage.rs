//! Storage collaborator (`spec.md §6`). The engine never interprets paths;
//! it only calls `read`/`write`/`list`/`delete`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::DbError;

#[async_trait]
pub trait KVStorage: Send + Sync {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, DbError>;
    async fn write(&self, path: &str, bytes: Vec<u8>) -> Result<(), DbError>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>, DbError>;
    async fn delete(&self, path: &str) -> Result<(), DbError>;
}

/// Zero-config default: an in-memory map. Useful for tests and for
/// databases built with no `file` configured on any collection.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KVStorage for MemoryStorage {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, DbError> {
        Ok(self.entries.read().get(path).cloned())
    }

    async fn write(&self, path: &str, bytes: Vec<u8>) -> Result<(), DbError> {
        self.entries.write().insert(path.to_string(), bytes);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, DbError> {
        Ok(self
            .entries
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, path: &str) -> Result<(), DbError> {
        self.entries.write().remove(path);
        Ok(())
    }
}

/// Filesystem-backed storage rooted at `root`.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl KVStorage for FsStorage {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, DbError> {
        match tokio::fs::read(self.resolve(path)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DbError::Storage(e.to_string()).log_and_return()),
        }
    }

    async fn write(&self, path: &str, bytes: Vec<u8>) -> Result<(), DbError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DbError::Storage(e.to_string()).log_and_return())?;
        }
        tokio::fs::write(full, bytes)
            .await
            .map_err(|e| DbError::Storage(e.to_string()).log_and_return())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, DbError> {
        let dir = self.resolve(prefix);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(DbError::Storage(e.to_string()).log_and_return()),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DbError::Storage(e.to_string()).log_and_return())?
        {
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                out.push(relative.to_string_lossy().into_owned());
            }
        }
        Ok(out)
    }

    async fn delete(&self, path: &str) -> Result<(), DbError> {
        match tokio::fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DbError::Storage(e.to_string()).log_and_return()),
        }
    }
}

pub fn extension_of(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_storage_round_trip() {
        let storage = MemoryStorage::new();
        storage.write("a/b.json", b"{}".to_vec()).await.unwrap();
        assert_eq!(storage.read("a/b.json").await.unwrap(), Some(b"{}".to_vec()));
        assert_eq!(storage.list("a/").await.unwrap(), vec!["a/b.json".to_string()]);
        storage.delete("a/b.json").await.unwrap();
        assert_eq!(storage.read("a/b.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn fs_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        storage.write("books.json", b"[]".to_vec()).await.unwrap();
        assert_eq!(storage.read("books.json").await.unwrap(), Some(b"[]".to_vec()));
    }
}
