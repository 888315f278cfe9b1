//! Top-level wiring: assembles collections, the plugin registry, and
//! storage/persistence into one `Database` handle.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::aggregate::{self, AggregateGroup, AggregateSpec};
use crate::codec::{CodecData, FormatCodec, JsonCodec, YamlCodec};
use crate::collection::{CollectionState, Entity};
use crate::config::DatabaseConfig;
use crate::cursor::{self, Cursor, Page};
use crate::error::DbError;
use crate::persist::DebouncedPersistence;
use crate::plugin::PluginRegistry;
use crate::query::{self, QuerySpec};
use crate::schema::CollectionDescriptor;
use crate::storage::extension_of;
use crate::value::{FieldMap, QueryValue};

/// Borrowed read access to every collection's descriptor and state, handed
/// to the query/cursor/aggregate/relate modules so they never need to know
/// about `Database`'s persistence or plugin plumbing.
pub struct CollectionsView<'a> {
    descriptors: &'a BTreeMap<String, CollectionDescriptor>,
    states: &'a BTreeMap<String, CollectionState>,
}

impl<'a> CollectionsView<'a> {
    pub fn descriptor(&self, name: &str) -> Result<&'a CollectionDescriptor, DbError> {
        self.descriptors.get(name).ok_or_else(|| {
            DbError::NotFound {
                collection: name.to_string(),
                id: String::new(),
            }
            .log_and_return()
        })
    }

    pub fn state(&self, name: &str) -> Result<&'a CollectionState, DbError> {
        self.states.get(name).ok_or_else(|| {
            DbError::NotFound {
                collection: name.to_string(),
                id: String::new(),
            }
            .log_and_return()
        })
    }

    pub fn all_descriptors(&self) -> impl Iterator<Item = (&'a String, &'a CollectionDescriptor)> {
        self.descriptors.iter()
    }
}

fn codec_for(registry: &PluginRegistry, path: &std::path::Path) -> Arc<dyn FormatCodec> {
    match extension_of(path).and_then(|ext| registry.codec(ext)) {
        Some(codec) => codec.clone(),
        None => match extension_of(path) {
            Some("yaml") | Some("yml") => Arc::new(YamlCodec),
            _ => Arc::new(JsonCodec),
        },
    }
}

pub struct Database {
    descriptors: BTreeMap<String, CollectionDescriptor>,
    states: BTreeMap<String, CollectionState>,
    registry: PluginRegistry,
    persistence: BTreeMap<String, Arc<DebouncedPersistence>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("descriptors", &self.descriptors.keys().collect::<Vec<_>>())
            .field("registry", &self.registry)
            .finish()
    }
}

impl Database {
    /// Build a database from configuration: validate the plugin registry,
    /// run plugin `initialize` effects, load any collections with a
    /// configured `file` from storage, and start the debounce loop for
    /// every persisted collection (`spec.md §4.3`, `§6`).
    pub async fn build(config: DatabaseConfig) -> Result<Arc<Self>, DbError> {
        let registry = PluginRegistry::build(config.plugins)?;
        registry.initialize_all().await?;

        for descriptor in &config.collections {
            if let Some(name) = &descriptor.id_generator {
                registry.validate_id_generator(name)?;
            }
        }

        let mut descriptors = BTreeMap::new();
        let mut states = BTreeMap::new();
        let mut persistence = BTreeMap::new();

        for descriptor in config.collections {
            let name = descriptor.name.clone();
            let state = match &descriptor.file {
                Some(path) => {
                    let codec = codec_for(&registry, path);
                    let path_str = path.to_string_lossy().into_owned();
                    let bytes = config.storage.read(&path_str).await?;
                    let data: CodecData = match bytes {
                        Some(bytes) => {
                            let raw = String::from_utf8(bytes)
                                .map_err(|e| DbError::Serialization(e.to_string()).log_and_return())?;
                            codec.decode(&raw)?
                        }
                        None => CodecData::new(),
                    };
                    let entities = data.into_values().filter_map(|v| match v {
                        QueryValue::Record(fields) => Some(Entity(fields)),
                        _ => None,
                    });
                    persistence.insert(
                        name.clone(),
                        Arc::new(DebouncedPersistence::new(
                            config.storage.clone(),
                            codec,
                            config.write_debounce_ms,
                        )),
                    );
                    CollectionState::from_entities(entities)
                }
                None => CollectionState::new(),
            };
            states.insert(name.clone(), state);
            descriptors.insert(name, descriptor);
        }

        for scheduler in persistence.values() {
            tokio::spawn(scheduler.clone().run());
        }

        Ok(Arc::new(Self {
            descriptors,
            states,
            registry,
            persistence,
        }))
    }

    pub(crate) fn descriptor(&self, collection: &str) -> Result<&CollectionDescriptor, DbError> {
        self.descriptors.get(collection).ok_or_else(|| {
            DbError::NotFound {
                collection: collection.to_string(),
                id: String::new(),
            }
            .log_and_return()
        })
    }

    pub(crate) fn state(&self, collection: &str) -> Result<&CollectionState, DbError> {
        self.states.get(collection).ok_or_else(|| {
            DbError::NotFound {
                collection: collection.to_string(),
                id: String::new(),
            }
            .log_and_return()
        })
    }

    pub(crate) fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn collections_view(&self) -> CollectionsView<'_> {
        CollectionsView {
            descriptors: &self.descriptors,
            states: &self.states,
        }
    }

    /// Schedule the collection's current state for a debounced write, if a
    /// `file` is configured for it (`spec.md §6`).
    pub(crate) fn schedule_persist(&self, collection: &str) {
        let Some(scheduler) = self.persistence.get(collection) else {
            return;
        };
        let Some(descriptor) = self.descriptors.get(collection) else {
            return;
        };
        let Some(path) = &descriptor.file else {
            return;
        };
        let Some(state) = self.states.get(collection) else {
            return;
        };
        let snapshot = state.read();
        let data: CodecData = snapshot
            .into_iter()
            .map(|(id, entity)| (id.0, QueryValue::Record(entity.fields().clone())))
            .collect();
        match scheduler.codec().encode(&data) {
            Ok(encoded) => scheduler.schedule(path.to_string_lossy().into_owned(), encoded.into_bytes()),
            Err(err) => tracing::error!(error = %err, collection, "failed to encode collection for persistence"),
        }
    }

    #[tracing::instrument(skip(self, spec))]
    pub fn find(&self, collection: &str, spec: &QuerySpec) -> Result<Vec<FieldMap>, DbError> {
        query::run(&self.collections_view(), collection, spec, &self.registry)
    }

    #[tracing::instrument(skip(self, cursor, base))]
    pub fn find_cursor(&self, collection: &str, cursor: &Cursor, base: &QuerySpec) -> Result<Page, DbError> {
        cursor::run(&self.collections_view(), collection, cursor, base, &self.registry)
    }

    #[tracing::instrument(skip(self, spec, agg))]
    pub fn aggregate(
        &self,
        collection: &str,
        spec: &QuerySpec,
        agg: &AggregateSpec,
    ) -> Result<Vec<AggregateGroup>, DbError> {
        aggregate::run(&self.collections_view(), collection, spec, agg, &self.registry)
    }

    pub fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<FieldMap>, DbError> {
        let descriptor = self.descriptor(collection)?;
        let state = self.state(collection)?;
        let snapshot = state.read();
        Ok(snapshot
            .get(&crate::collection::EntityId::from(id))
            .map(|entity| {
                let candidate = query::Candidate {
                    entity: entity.clone(),
                    populated: Default::default(),
                    computed: Default::default(),
                };
                query::project(&candidate, &None, descriptor)
            }))
    }

    /// Flush all pending persisted writes and run plugin `shutdown` effects
    /// in reverse registration order (`spec.md §4.3`).
    pub async fn shutdown(&self) {
        for scheduler in self.persistence.values() {
            if let Err(err) = scheduler.flush().await {
                tracing::error!(error = %err, "failed to flush collection on shutdown");
            }
        }
        self.registry.shutdown_all().await;
    }
}

/// A thin, collection-scoped convenience wrapper over `Database`, mirroring
/// the teacher's practice of handing out a narrow handle bound to one table
/// instead of requiring the collection name at every call site.
pub struct CollectionHandle {
    db: Arc<Database>,
    name: String,
}

impl CollectionHandle {
    pub fn new(db: Arc<Database>, name: impl Into<String>) -> Self {
        Self { db, name: name.into() }
    }

    pub fn find(&self, spec: &QuerySpec) -> Result<Vec<FieldMap>, DbError> {
        self.db.find(&self.name, spec)
    }

    pub fn find_cursor(&self, cursor: &Cursor, base: &QuerySpec) -> Result<Page, DbError> {
        self.db.find_cursor(&self.name, cursor, base)
    }

    pub fn aggregate(&self, spec: &QuerySpec, agg: &AggregateSpec) -> Result<Vec<AggregateGroup>, DbError> {
        self.db.aggregate(&self.name, spec, agg)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<FieldMap>, DbError> {
        self.db.find_by_id(&self.name, id)
    }

    pub async fn create(&self, data: FieldMap) -> Result<FieldMap, DbError> {
        self.db.create(&self.name, data).await
    }

    pub async fn update(&self, id: &str, patch: FieldMap) -> Result<FieldMap, DbError> {
        self.db.update(&self.name, id, patch).await
    }

    pub async fn delete(&self, id: &str, soft: bool) -> Result<FieldMap, DbError> {
        self.db.delete(&self.name, id, soft).await
    }
}
