//! Hook orchestrator (C8, `spec.md §4.8`).
//!
//! `beforeX` hooks are transforming: each sees the previous hook's output.
//! `afterX`/`onChange` hooks are observing: their return value is discarded
//! and only their error (if any) propagates.

use async_trait::async_trait;

use crate::error::DbError;
use crate::value::FieldMap;

#[async_trait]
pub trait BeforeHook: Send + Sync {
    async fn call(&self, collection: &str, data: FieldMap) -> Result<FieldMap, DbError>;
}

#[async_trait]
pub trait AfterHook: Send + Sync {
    async fn call(&self, collection: &str, entity: &FieldMap) -> Result<(), DbError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub collection: String,
    pub kind: ChangeKind,
    pub entity: FieldMap,
}

#[async_trait]
pub trait ChangeHook: Send + Sync {
    async fn call(&self, event: &ChangeEvent) -> Result<(), DbError>;
}

/// Plugin-contributed hooks that fire for every collection, in
/// plugin-registration order (`spec.md §4.3`, `§4.8`).
#[derive(Default)]
pub struct GlobalHooks {
    pub before_create: Vec<std::sync::Arc<dyn BeforeHook>>,
    pub after_create: Vec<std::sync::Arc<dyn AfterHook>>,
    pub before_update: Vec<std::sync::Arc<dyn BeforeHook>>,
    pub after_update: Vec<std::sync::Arc<dyn AfterHook>>,
    pub before_delete: Vec<std::sync::Arc<dyn BeforeHook>>,
    pub after_delete: Vec<std::sync::Arc<dyn AfterHook>>,
    pub on_change: Vec<std::sync::Arc<dyn ChangeHook>>,
}

/// Fold a list of transforming hooks over `data`, left to right.
pub async fn run_before_chain(
    hooks: &[std::sync::Arc<dyn BeforeHook>],
    collection: &str,
    mut data: FieldMap,
) -> Result<FieldMap, DbError> {
    for hook in hooks {
        data = hook.call(collection, data).await?;
    }
    Ok(data)
}

/// Fan out a list of observing hooks over `entity`; the first error aborts
/// (but, per `spec.md §7`, does not roll back the already-committed state).
pub async fn run_after_chain(
    hooks: &[std::sync::Arc<dyn AfterHook>],
    collection: &str,
    entity: &FieldMap,
) -> Result<(), DbError> {
    for hook in hooks {
        hook.call(collection, entity).await?;
    }
    Ok(())
}

pub async fn run_change_chain(
    hooks: &[std::sync::Arc<dyn ChangeHook>],
    event: &ChangeEvent,
) -> Result<(), DbError> {
    for hook in hooks {
        hook.call(event).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Stamp(Arc<AtomicUsize>);

    #[async_trait]
    impl BeforeHook for Stamp {
        async fn call(&self, _collection: &str, mut data: FieldMap) -> Result<FieldMap, DbError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            data.insert(
                "touched".into(),
                crate::value::QueryValue::Number(self.0.load(Ordering::SeqCst) as f64),
            );
            Ok(data)
        }
    }

    #[tokio::test]
    async fn before_chain_threads_output_to_next_hook() {
        let counter = Arc::new(AtomicUsize::new(0));
        let hooks: Vec<Arc<dyn BeforeHook>> =
            vec![Arc::new(Stamp(counter.clone())), Arc::new(Stamp(counter.clone()))];
        let out = run_before_chain(&hooks, "widgets", FieldMap::new())
            .await
            .unwrap();
        assert_eq!(out.get("touched").unwrap().as_number(), Some(2.0));
    }
}
