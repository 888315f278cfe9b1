//! # haven
//!
//! An embedded, schema-validated, in-memory document database with a
//! plugin-extensible query/mutation engine.
//!
//! Collections are declared up front with a [`schema::CollectionDescriptor`]
//! (field types, unique constraints, relationships, computed fields, hooks),
//! then served out of a [`db::Database`] built from a [`config::DatabaseConfig`].
//! Reads flow through the eight-stage query pipeline (`query`), its cursor
//! variant (`cursor`), and the aggregator (`aggregate`); writes flow through
//! the mutation engine (`mutation`), which deep-merges patches, enforces
//! uniqueness and foreign keys, and orchestrates hooks (`hooks`) around every
//! commit to a collection's state cell (`collection`).

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod aggregate;
pub mod codec;
pub mod collection;
pub mod config;
pub mod cursor;
pub mod db;
pub mod error;
pub mod hooks;
pub mod mutation;
pub mod operators;
pub mod persist;
pub mod plugin;
pub mod query;
pub mod relate;
pub mod schema;
pub mod storage;
pub mod value;

pub use aggregate::{AggOp, AggregateGroup, AggregateSpec};
pub use collection::{CollectionState, Entity, EntityId};
pub use config::DatabaseConfig;
pub use cursor::{Cursor, Page, PageInfo};
pub use db::{CollectionHandle, CollectionsView, Database};
pub use error::{DbError, DbResult, PluginErrorReason, ValidationIssue};
pub use hooks::{AfterHook, BeforeHook, ChangeEvent, ChangeHook, ChangeKind, GlobalHooks};
pub use mutation::{
    CreateManySummary, DeleteManySummary, SkippedItem, UpdateManySummary, UpsertAction, UpsertEntry, UpsertManySummary,
    UpsertResult,
};
pub use plugin::{CustomIdGenerator, CustomOperator, Plugin, PluginRegistry};
pub use query::{Candidate, FieldFilter, PopulateMap, PopulateSpec, QuerySpec, Select, SortDir, WhereClause};
pub use relate::{PopulatedEntity, PopulatedValue, PopulatedView};
pub use schema::{
    CollectionDescriptor, CollectionSchema, ComputedField, ComputedFn, FieldSchema, FieldType, HookSet,
    RelationshipDef, RelationshipKind, UniqueConstraint,
};
pub use storage::{FsStorage, KVStorage, MemoryStorage};
pub use value::{FieldMap, QueryValue, ValueTypeTag};

/// Crate version, as declared in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
