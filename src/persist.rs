//! Persistence scheduler (`spec.md §6`): debounced write-behind with a
//! `flush()` contract the engine can call at any suspension point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::codec::FormatCodec;
use crate::error::DbError;
use crate::storage::KVStorage;

/// A pending write keyed by storage path.
struct Pending {
    path: String,
    bytes: Vec<u8>,
}

pub struct DebouncedPersistence {
    storage: Arc<dyn KVStorage>,
    codec: Arc<dyn FormatCodec>,
    debounce: Duration,
    pending: Mutex<Option<Pending>>,
    dirty: AtomicBool,
    notify: Notify,
}

impl DebouncedPersistence {
    pub fn new(storage: Arc<dyn KVStorage>, codec: Arc<dyn FormatCodec>, debounce_ms: u64) -> Self {
        Self {
            storage,
            codec,
            debounce: Duration::from_millis(debounce_ms),
            pending: Mutex::new(None),
            dirty: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Queue a write; the actual storage write happens after `debounce`
    /// elapses with no further scheduling, or immediately on `flush()`.
    pub fn schedule(&self, path: String, bytes: Vec<u8>) {
        *self.pending.lock() = Some(Pending { path, bytes });
        self.dirty.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Drain any pending write immediately, bypassing the debounce window.
    pub async fn flush(&self) -> Result<(), DbError> {
        let pending = self.pending.lock().take();
        if let Some(Pending { path, bytes }) = pending {
            self.storage.write(&path, bytes).await?;
            self.dirty.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Run the debounce loop until cancelled. Intended to be spawned once
    /// per `Database` instance onto the embedder's `tokio` runtime.
    pub async fn run(self: Arc<Self>) {
        loop {
            self.notify.notified().await;
            tokio::time::sleep(self.debounce).await;
            if self.dirty.load(Ordering::SeqCst) {
                if let Err(err) = self.flush().await {
                    tracing::error!(error = %err, "debounced flush failed");
                }
            }
        }
    }

    pub fn codec(&self) -> &Arc<dyn FormatCodec> {
        &self.codec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn flush_drains_pending_write() {
        let persistence = DebouncedPersistence::new(Arc::new(MemoryStorage::new()), Arc::new(JsonCodec), 50);
        persistence.schedule("books.json".into(), b"{}".to_vec());
        persistence.flush().await.unwrap();
        assert_eq!(
            persistence.storage.read("books.json").await.unwrap(),
            Some(b"{}".to_vec())
        );
    }
}
