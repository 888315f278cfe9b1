//! Mutation engine (C7, `spec.md §4.7`): create/update/delete and their
//! batch variants, deep-merge patch application, and hook orchestration
//! around the state-cell commit.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::collection::{Entity, EntityId};
use crate::db::{CollectionsView, Database};
use crate::error::DbError;
use crate::hooks::{self, ChangeEvent, ChangeKind};
use crate::relate;
use crate::schema::{self, CollectionDescriptor};
use crate::value::{FieldMap, QueryValue};

#[derive(Debug)]
pub struct SkippedItem {
    pub index: usize,
    pub reason: DbError,
}

#[derive(Debug, Default)]
pub struct CreateManySummary {
    pub created: Vec<FieldMap>,
    pub skipped: Vec<SkippedItem>,
}

#[derive(Debug, Default)]
pub struct UpdateManySummary {
    pub count: usize,
    pub updated: Vec<FieldMap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Created,
    Updated,
}

#[derive(Debug)]
pub struct UpsertResult {
    pub entity: FieldMap,
    pub action: UpsertAction,
}

#[derive(Debug, Clone)]
pub struct UpsertEntry {
    pub where_: FieldMap,
    pub create: FieldMap,
    pub update: FieldMap,
}

#[derive(Debug, Default)]
pub struct UpsertManySummary {
    pub created: Vec<FieldMap>,
    pub updated: Vec<FieldMap>,
    pub unchanged: Vec<FieldMap>,
}

#[derive(Debug, Default)]
pub struct DeleteManySummary {
    pub count: usize,
    pub deleted: Vec<FieldMap>,
}

/// Silently drop input keys that name a computed field (`spec.md §4.7`).
fn strip_computed(mut raw: FieldMap, computed: &std::collections::BTreeMap<String, schema::ComputedField>) -> FieldMap {
    raw.retain(|key, _| !computed.contains_key(key));
    raw
}

fn is_operator_key(key: &str) -> bool {
    key.starts_with('$')
}

/// Whether a patch uses any update operator anywhere in its tree — per
/// `spec.md §9`, operator-based patches are never classified `unchanged`.
pub fn contains_operator(value: &QueryValue) -> bool {
    match value {
        QueryValue::Record(map) => map.keys().any(|k| is_operator_key(k)) || map.values().any(contains_operator),
        _ => false,
    }
}

fn numeric_op(current: &QueryValue, operand: &QueryValue, f: impl Fn(f64, f64) -> f64) -> Result<QueryValue, DbError> {
    match (current.as_number(), operand.as_number()) {
        (Some(a), Some(b)) => Ok(QueryValue::Number(f(a, b))),
        _ => Err(DbError::single_validation("patch", "numeric operator applied to a non-number")),
    }
}

fn append_op(current: &QueryValue, operand: &QueryValue, at_end: bool) -> Result<QueryValue, DbError> {
    match current {
        QueryValue::Text(s) => {
            let addition = operand
                .as_text()
                .ok_or_else(|| DbError::single_validation("patch", "$append/$prepend on a string requires a string operand"))?;
            Ok(QueryValue::Text(if at_end {
                format!("{s}{addition}")
            } else {
                format!("{addition}{s}")
            }))
        }
        QueryValue::Seq(items) => {
            let mut items = items.clone();
            let additions: Vec<QueryValue> = match operand {
                QueryValue::Seq(more) => more.clone(),
                other => vec![other.clone()],
            };
            if at_end {
                items.extend(additions);
            } else {
                let mut next = additions;
                next.extend(items);
                items = next;
            }
            Ok(QueryValue::Seq(items))
        }
        _ => Err(DbError::single_validation("patch", "$append/$prepend requires a string or sequence field")),
    }
}

fn remove_op(current: &QueryValue, operand: &QueryValue) -> Result<QueryValue, DbError> {
    match current {
        QueryValue::Seq(items) => {
            let mut items = items.clone();
            if let Some(pos) = items.iter().position(|v| v == operand) {
                items.remove(pos);
            }
            Ok(QueryValue::Seq(items))
        }
        _ => Err(DbError::single_validation("patch", "$remove requires a sequence field")),
    }
}

fn toggle_op(current: &QueryValue) -> Result<QueryValue, DbError> {
    match current.as_bool() {
        Some(b) => Ok(QueryValue::Bool(!b)),
        None => Err(DbError::single_validation("patch", "$toggle requires a boolean field")),
    }
}

fn apply_operators(current: &QueryValue, ops: &FieldMap) -> Result<QueryValue, DbError> {
    let mut result = current.clone();
    for (op, operand) in ops {
        result = match op.as_str() {
            "$set" => operand.clone(),
            "$increment" => numeric_op(&result, operand, |a, b| a + b)?,
            "$decrement" => numeric_op(&result, operand, |a, b| a - b)?,
            "$multiply" => numeric_op(&result, operand, |a, b| a * b)?,
            "$append" => append_op(&result, operand, true)?,
            "$prepend" => append_op(&result, operand, false)?,
            "$remove" => remove_op(&result, operand)?,
            "$toggle" => toggle_op(&result)?,
            other => return Err(DbError::single_validation("patch", format!("unknown update operator {other}"))),
        };
    }
    Ok(result)
}

/// Deep-merge a patch into the current value (`spec.md §4.7`). Plain
/// scalars/sequences overwrite; a plain sub-object recurses field by field;
/// an object whose keys are entirely operator names applies those operators
/// in order. Mixing operator and plain keys at one level is rejected.
pub fn apply_patch(current: &QueryValue, patch: &QueryValue) -> Result<QueryValue, DbError> {
    match patch {
        QueryValue::Record(map) => {
            if map.is_empty() {
                return Ok(current.clone());
            }
            let all_operator = map.keys().all(|k| is_operator_key(k));
            let any_operator = map.keys().any(|k| is_operator_key(k));
            if any_operator && !all_operator {
                return Err(DbError::single_validation(
                    "patch",
                    "cannot mix update operators and plain subkeys at the same level",
                ));
            }
            if all_operator {
                apply_operators(current, map)
            } else {
                let mut base = current.as_record().cloned().unwrap_or_default();
                for (key, sub_patch) in map {
                    let current_sub = base.get(key).cloned().unwrap_or(QueryValue::Null);
                    base.insert(key.clone(), apply_patch(&current_sub, sub_patch)?);
                }
                Ok(QueryValue::Record(base))
            }
        }
        other => Ok(other.clone()),
    }
}

fn check_uniqueness(
    descriptor: &CollectionDescriptor,
    snapshot: &im::HashMap<EntityId, Arc<Entity>>,
    candidate: &FieldMap,
    exclude_id: Option<&EntityId>,
) -> Result<(), DbError> {
    for constraint in &descriptor.unique_fields {
        let candidate_values: Vec<QueryValue> = constraint
            .0
            .iter()
            .map(|f| candidate.get(f).cloned().unwrap_or(QueryValue::Null))
            .collect();
        if candidate_values.iter().any(QueryValue::is_null) {
            continue;
        }
        for (id, entity) in snapshot.iter() {
            if exclude_id == Some(id) || entity.is_soft_deleted() {
                continue;
            }
            let collides = constraint.0.iter().all(|f| entity.get(f) == candidate.get(f));
            if collides {
                return Err(DbError::DuplicateKey {
                    collection: descriptor.name.clone(),
                    field: constraint.0.join(","),
                    value: candidate_values
                        .iter()
                        .filter_map(QueryValue::cursor_string)
                        .collect::<Vec<_>>()
                        .join(","),
                }
                .log_and_return());
            }
        }
    }
    Ok(())
}

fn check_foreign_keys(
    collections: &CollectionsView<'_>,
    descriptor: &CollectionDescriptor,
    candidate: &FieldMap,
    changed_fields: Option<&BTreeSet<String>>,
) -> Result<(), DbError> {
    for (rel_name, rel) in &descriptor.relationships {
        if rel.kind != crate::schema::RelationshipKind::Ref {
            continue;
        }
        if let Some(changed) = changed_fields {
            if !changed.contains(&rel.foreign_key) {
                continue;
            }
        }
        let Some(value) = candidate.get(&rel.foreign_key) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let Some(id_str) = value.as_text() else {
            continue;
        };
        let target_state = collections.state(&rel.target)?;
        if !target_state.read().contains_key(&EntityId::from(id_str)) {
            return Err(DbError::ForeignKey {
                field: rel_name.clone(),
                value: id_str.to_string(),
                target_collection: rel.target.clone(),
            }
            .log_and_return());
        }
    }
    Ok(())
}

fn generate_id(descriptor: &CollectionDescriptor, registry: &crate::plugin::PluginRegistry) -> Result<String, DbError> {
    match &descriptor.id_generator {
        Some(name) => {
            let generator = registry
                .id_generator(name)
                .expect("id generator existence is validated at database build time");
            Ok(generator.generate())
        }
        None => Ok(uuid::Uuid::new_v4().to_string()),
    }
}

fn locate<'a>(
    snapshot: &'a im::HashMap<EntityId, Arc<Entity>>,
    locator: &FieldMap,
) -> Option<(EntityId, Arc<Entity>)> {
    if let Some(QueryValue::Text(id)) = locator.get("id") {
        let key = EntityId::from(id.as_str());
        return snapshot.get(&key).map(|entity| (key, entity.clone()));
    }
    snapshot
        .iter()
        .find(|(_, entity)| !entity.is_soft_deleted() && locator.iter().all(|(k, v)| entity.get(k) == Some(v)))
        .map(|(id, entity)| (id.clone(), entity.clone()))
}

impl Database {
    /// Validation/preparation phase of `create`, shared by `create` and
    /// `create_many` so batches can prepare every item before committing
    /// any of them (`spec.md §4.7` atomicity).
    fn prepare_create(
        &self,
        descriptor: &CollectionDescriptor,
        raw: FieldMap,
        snapshot: &im::HashMap<EntityId, Arc<Entity>>,
    ) -> Result<(String, FieldMap), DbError> {
        let mut raw = strip_computed(raw, &descriptor.computed);
        let id = match raw.remove("id") {
            Some(QueryValue::Text(s)) if !s.is_empty() => s,
            _ => generate_id(descriptor, self.registry())?,
        };
        if snapshot.contains_key(&EntityId::from(id.clone())) {
            return Err(DbError::DuplicateKey {
                collection: descriptor.name.clone(),
                field: "id".into(),
                value: id,
            }
            .log_and_return());
        }
        raw.insert("id".into(), QueryValue::Text(id.clone()));
        let now = QueryValue::Text(chrono::Utc::now().to_rfc3339());
        if descriptor.schema.contains_key("createdAt") {
            raw.insert("createdAt".into(), now.clone());
        }
        if descriptor.schema.contains_key("updatedAt") {
            raw.insert("updatedAt".into(), now);
        }
        let validated = schema::validate_and_apply_defaults(raw, &descriptor.schema, &descriptor.computed)?;
        check_uniqueness(descriptor, snapshot, &validated, None)?;
        check_foreign_keys(&self.collections_view(), descriptor, &validated, None)?;
        Ok((id, validated))
    }

    pub async fn create(&self, collection: &str, raw: FieldMap) -> Result<FieldMap, DbError> {
        let descriptor = self.descriptor(collection)?;
        let state = self.state(collection)?;
        let (id, validated) = self.prepare_create(descriptor, raw, &state.read())?;

        let mut data = hooks::run_before_chain(&self.registry().global_hooks().before_create, collection, validated).await?;
        data = hooks::run_before_chain(&descriptor.hooks.before_create, collection, data).await?;

        let id_key = EntityId::from(id);
        if state.read().contains_key(&id_key) {
            return Err(DbError::DuplicateKey {
                collection: collection.to_string(),
                field: "id".into(),
                value: id_key.0,
            }
            .log_and_return());
        }
        let entity = Entity(data.clone());
        state.update(|mut map| {
            map.insert(id_key.clone(), Arc::new(entity.clone()));
            map
        });

        hooks::run_after_chain(&self.registry().global_hooks().after_create, collection, &data).await?;
        hooks::run_after_chain(&descriptor.hooks.after_create, collection, &data).await?;
        hooks::run_change_chain(
            &self.registry().global_hooks().on_change,
            &ChangeEvent {
                collection: collection.to_string(),
                kind: ChangeKind::Create,
                entity: data.clone(),
            },
        )
        .await?;
        self.schedule_persist(collection);
        Ok(data)
    }

    pub async fn create_many(
        &self,
        collection: &str,
        items: Vec<FieldMap>,
        skip_duplicates: bool,
    ) -> Result<CreateManySummary, DbError> {
        let descriptor = self.descriptor(collection)?;
        let state = self.state(collection)?;
        let mut working = state.read();
        let mut prepared: Vec<(EntityId, FieldMap)> = Vec::new();
        let mut skipped = Vec::new();

        for (index, raw) in items.into_iter().enumerate() {
            match self.prepare_create(descriptor, raw, &working) {
                Ok((id, validated)) => {
                    let mut data =
                        hooks::run_before_chain(&self.registry().global_hooks().before_create, collection, validated)
                            .await?;
                    data = hooks::run_before_chain(&descriptor.hooks.before_create, collection, data).await?;
                    let id_key = EntityId::from(id);
                    working.insert(id_key.clone(), Arc::new(Entity(data.clone())));
                    prepared.push((id_key, data));
                }
                Err(err @ (DbError::DuplicateKey { .. } | DbError::ForeignKey { .. })) if skip_duplicates => {
                    skipped.push(SkippedItem { index, reason: err });
                }
                Err(err) => return Err(err),
            }
        }

        state.update(|mut map| {
            for (id, data) in &prepared {
                map.insert(id.clone(), Arc::new(Entity(data.clone())));
            }
            map
        });

        for (_, data) in &prepared {
            hooks::run_after_chain(&self.registry().global_hooks().after_create, collection, data).await?;
            hooks::run_after_chain(&descriptor.hooks.after_create, collection, data).await?;
            hooks::run_change_chain(
                &self.registry().global_hooks().on_change,
                &ChangeEvent {
                    collection: collection.to_string(),
                    kind: ChangeKind::Create,
                    entity: data.clone(),
                },
            )
            .await?;
        }
        self.schedule_persist(collection);

        Ok(CreateManySummary {
            created: prepared.into_iter().map(|(_, data)| data).collect(),
            skipped,
        })
    }

    pub async fn update(&self, collection: &str, id: &str, patch: FieldMap) -> Result<FieldMap, DbError> {
        let descriptor = self.descriptor(collection)?;
        let state = self.state(collection)?;
        let snapshot = state.read();
        let id_key = EntityId::from(id);
        let current = snapshot.get(&id_key).cloned().ok_or_else(|| {
            DbError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }
            .log_and_return()
        })?;

        let patch = strip_computed(patch, &descriptor.computed);
        let merged_value = apply_patch(&QueryValue::Record(current.fields().clone()), &QueryValue::Record(patch))?;
        let mut merged = match merged_value {
            QueryValue::Record(map) => map,
            _ => return Err(DbError::single_validation("patch", "update patch must resolve to a record")),
        };
        if descriptor.schema.contains_key("updatedAt") {
            merged.insert("updatedAt".into(), QueryValue::Text(chrono::Utc::now().to_rfc3339()));
        }

        let validated = schema::validate_and_apply_defaults(merged, &descriptor.schema, &descriptor.computed)?;
        check_uniqueness(descriptor, &snapshot, &validated, Some(&id_key))?;
        let changed: BTreeSet<String> = descriptor
            .schema
            .keys()
            .filter(|f| current.get(f) != validated.get(f.as_str()))
            .cloned()
            .collect();
        check_foreign_keys(&self.collections_view(), descriptor, &validated, Some(&changed))?;

        let mut data = hooks::run_before_chain(&self.registry().global_hooks().before_update, collection, validated).await?;
        data = hooks::run_before_chain(&descriptor.hooks.before_update, collection, data).await?;

        let entity = Entity(data.clone());
        state.update(|mut map| {
            map.insert(id_key.clone(), Arc::new(entity.clone()));
            map
        });

        hooks::run_after_chain(&self.registry().global_hooks().after_update, collection, &data).await?;
        hooks::run_after_chain(&descriptor.hooks.after_update, collection, &data).await?;
        hooks::run_change_chain(
            &self.registry().global_hooks().on_change,
            &ChangeEvent {
                collection: collection.to_string(),
                kind: ChangeKind::Update,
                entity: data.clone(),
            },
        )
        .await?;
        self.schedule_persist(collection);
        Ok(data)
    }

    pub async fn update_many(
        &self,
        collection: &str,
        predicate: impl Fn(&FieldMap) -> bool,
        patch: FieldMap,
        limit: Option<usize>,
    ) -> Result<UpdateManySummary, DbError> {
        let descriptor = self.descriptor(collection)?;
        let state = self.state(collection)?;
        let snapshot = state.read();
        let mut matches: Vec<(EntityId, Arc<Entity>)> = snapshot
            .iter()
            .filter(|(_, entity)| predicate(entity.fields()))
            .map(|(id, entity)| (id.clone(), entity.clone()))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        if let Some(limit) = limit {
            matches.truncate(limit);
        }

        let stripped_patch = strip_computed(patch, &descriptor.computed);
        let mut prepared: Vec<(EntityId, FieldMap)> = Vec::new();

        for (id_key, current) in &matches {
            let merged_value = apply_patch(
                &QueryValue::Record(current.fields().clone()),
                &QueryValue::Record(stripped_patch.clone()),
            )?;
            let mut merged = match merged_value {
                QueryValue::Record(map) => map,
                _ => return Err(DbError::single_validation("patch", "update patch must resolve to a record")),
            };
            if descriptor.schema.contains_key("updatedAt") {
                merged.insert("updatedAt".into(), QueryValue::Text(chrono::Utc::now().to_rfc3339()));
            }
            let validated = schema::validate_and_apply_defaults(merged, &descriptor.schema, &descriptor.computed)?;
            check_uniqueness(descriptor, &snapshot, &validated, Some(id_key))?;
            let changed: BTreeSet<String> = descriptor
                .schema
                .keys()
                .filter(|f| current.get(f) != validated.get(f.as_str()))
                .cloned()
                .collect();
            check_foreign_keys(&self.collections_view(), descriptor, &validated, Some(&changed))?;
            let mut data = hooks::run_before_chain(&self.registry().global_hooks().before_update, collection, validated).await?;
            data = hooks::run_before_chain(&descriptor.hooks.before_update, collection, data).await?;
            prepared.push((id_key.clone(), data));
        }

        state.update(|mut map| {
            for (id, data) in &prepared {
                map.insert(id.clone(), Arc::new(Entity(data.clone())));
            }
            map
        });

        for (_, data) in &prepared {
            hooks::run_after_chain(&self.registry().global_hooks().after_update, collection, data).await?;
            hooks::run_after_chain(&descriptor.hooks.after_update, collection, data).await?;
            hooks::run_change_chain(
                &self.registry().global_hooks().on_change,
                &ChangeEvent {
                    collection: collection.to_string(),
                    kind: ChangeKind::Update,
                    entity: data.clone(),
                },
            )
            .await?;
        }
        self.schedule_persist(collection);

        Ok(UpdateManySummary {
            count: prepared.len(),
            updated: prepared.into_iter().map(|(_, data)| data).collect(),
        })
    }

    pub async fn delete(&self, collection: &str, id: &str, soft: bool) -> Result<FieldMap, DbError> {
        let descriptor = self.descriptor(collection)?;
        let state = self.state(collection)?;
        let id_key = EntityId::from(id);

        if soft {
            if !descriptor.declares_deleted_at() {
                return Err(DbError::Operation(format!("collection {collection:?} has no deletedAt field")).log_and_return());
            }
            let snapshot = state.read();
            let current = snapshot.get(&id_key).cloned().ok_or_else(|| {
                DbError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                }
                .log_and_return()
            })?;
            let mut candidate = current.fields().clone();
            if !current.is_soft_deleted() {
                let now = QueryValue::Text(chrono::Utc::now().to_rfc3339());
                candidate.insert("deletedAt".into(), now.clone());
                if descriptor.schema.contains_key("updatedAt") {
                    candidate.insert("updatedAt".into(), now);
                }
            }
            let mut data = hooks::run_before_chain(&self.registry().global_hooks().before_delete, collection, candidate).await?;
            data = hooks::run_before_chain(&descriptor.hooks.before_delete, collection, data).await?;

            let entity = Entity(data.clone());
            state.update(|mut map| {
                map.insert(id_key.clone(), Arc::new(entity.clone()));
                map
            });

            hooks::run_after_chain(&self.registry().global_hooks().after_delete, collection, &data).await?;
            hooks::run_after_chain(&descriptor.hooks.after_delete, collection, &data).await?;
            hooks::run_change_chain(
                &self.registry().global_hooks().on_change,
                &ChangeEvent {
                    collection: collection.to_string(),
                    kind: ChangeKind::Delete,
                    entity: data.clone(),
                },
            )
            .await?;
            self.schedule_persist(collection);
            Ok(data)
        } else {
            let blockers = relate::blocking_referents(&self.collections_view(), collection, &id_key)?;
            if let Some((_, rel_name)) = blockers.first() {
                return Err(DbError::ForeignKey {
                    field: rel_name.clone(),
                    value: id.to_string(),
                    target_collection: collection.to_string(),
                }
                .log_and_return());
            }
            let snapshot = state.read();
            let current = snapshot.get(&id_key).cloned().ok_or_else(|| {
                DbError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                }
                .log_and_return()
            })?;
            let data = current.fields().clone();

            hooks::run_before_chain(&self.registry().global_hooks().before_delete, collection, data.clone()).await?;
            hooks::run_before_chain(&descriptor.hooks.before_delete, collection, data.clone()).await?;

            state.update(|mut map| {
                map.remove(&id_key);
                map
            });

            hooks::run_after_chain(&self.registry().global_hooks().after_delete, collection, &data).await?;
            hooks::run_after_chain(&descriptor.hooks.after_delete, collection, &data).await?;
            hooks::run_change_chain(
                &self.registry().global_hooks().on_change,
                &ChangeEvent {
                    collection: collection.to_string(),
                    kind: ChangeKind::Delete,
                    entity: data.clone(),
                },
            )
            .await?;
            self.schedule_persist(collection);
            Ok(data)
        }
    }

    pub async fn delete_many(
        &self,
        collection: &str,
        predicate: impl Fn(&FieldMap) -> bool,
        soft: bool,
        limit: Option<usize>,
    ) -> Result<DeleteManySummary, DbError> {
        let descriptor = self.descriptor(collection)?;
        let state = self.state(collection)?;
        let snapshot = state.read();
        let mut matches: Vec<(EntityId, Arc<Entity>)> = snapshot
            .iter()
            .filter(|(_, entity)| predicate(entity.fields()))
            .map(|(id, entity)| (id.clone(), entity.clone()))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        if let Some(limit) = limit {
            matches.truncate(limit);
        }

        if soft && !descriptor.declares_deleted_at() {
            return Err(DbError::Operation(format!("collection {collection:?} has no deletedAt field")).log_and_return());
        }
        if !soft {
            for (id_key, _) in &matches {
                let blockers = relate::blocking_referents(&self.collections_view(), collection, id_key)?;
                if let Some((_, rel_name)) = blockers.first() {
                    return Err(DbError::ForeignKey {
                        field: rel_name.clone(),
                        value: id_key.0.clone(),
                        target_collection: collection.to_string(),
                    }
                    .log_and_return());
                }
            }
        }

        let mut prepared: Vec<(EntityId, FieldMap)> = Vec::new();
        for (id_key, current) in &matches {
            let mut candidate = current.fields().clone();
            if soft && !current.is_soft_deleted() {
                let now = QueryValue::Text(chrono::Utc::now().to_rfc3339());
                candidate.insert("deletedAt".into(), now.clone());
                if descriptor.schema.contains_key("updatedAt") {
                    candidate.insert("updatedAt".into(), now);
                }
            }
            let mut data = hooks::run_before_chain(&self.registry().global_hooks().before_delete, collection, candidate).await?;
            data = hooks::run_before_chain(&descriptor.hooks.before_delete, collection, data).await?;
            prepared.push((id_key.clone(), data));
        }

        state.update(|mut map| {
            for (id, data) in &prepared {
                if soft {
                    map.insert(id.clone(), Arc::new(Entity(data.clone())));
                } else {
                    map.remove(id);
                }
            }
            map
        });

        for (_, data) in &prepared {
            hooks::run_after_chain(&self.registry().global_hooks().after_delete, collection, data).await?;
            hooks::run_after_chain(&descriptor.hooks.after_delete, collection, data).await?;
            hooks::run_change_chain(
                &self.registry().global_hooks().on_change,
                &ChangeEvent {
                    collection: collection.to_string(),
                    kind: ChangeKind::Delete,
                    entity: data.clone(),
                },
            )
            .await?;
        }
        self.schedule_persist(collection);

        Ok(DeleteManySummary {
            count: prepared.len(),
            deleted: prepared.into_iter().map(|(_, data)| data).collect(),
        })
    }

    pub async fn upsert(
        &self,
        collection: &str,
        locator: FieldMap,
        create_data: FieldMap,
        update_patch: FieldMap,
    ) -> Result<UpsertResult, DbError> {
        let state = self.state(collection)?;
        let existing_id = locate(&state.read(), &locator).map(|(id, _)| id);
        match existing_id {
            Some(id) => {
                let entity = self.update(collection, &id.0, update_patch).await?;
                Ok(UpsertResult {
                    entity,
                    action: UpsertAction::Updated,
                })
            }
            None => {
                let entity = self.create(collection, create_data).await?;
                Ok(UpsertResult {
                    entity,
                    action: UpsertAction::Created,
                })
            }
        }
    }

    pub async fn upsert_many(&self, collection: &str, entries: Vec<UpsertEntry>) -> Result<UpsertManySummary, DbError> {
        let descriptor = self.descriptor(collection)?;
        let state = self.state(collection)?;
        let mut working = state.read();

        enum Prepared {
            Created(EntityId, FieldMap),
            Updated(EntityId, FieldMap),
            Unchanged(FieldMap),
        }
        let mut prepared = Vec::new();

        for entry in entries {
            match locate(&working, &entry.where_) {
                Some((id_key, current)) => {
                    let operator_based = contains_operator(&QueryValue::Record(entry.update.clone()));
                    let stripped = strip_computed(entry.update, &descriptor.computed);
                    let merged_value =
                        apply_patch(&QueryValue::Record(current.fields().clone()), &QueryValue::Record(stripped))?;
                    let merged = match merged_value {
                        QueryValue::Record(map) => map,
                        _ => return Err(DbError::single_validation("patch", "update patch must resolve to a record")),
                    };
                    let unchanged = !operator_based && merged == *current.fields();
                    if unchanged {
                        prepared.push(Prepared::Unchanged(merged));
                        continue;
                    }
                    let mut merged = merged;
                    if descriptor.schema.contains_key("updatedAt") {
                        merged.insert("updatedAt".into(), QueryValue::Text(chrono::Utc::now().to_rfc3339()));
                    }
                    let validated = schema::validate_and_apply_defaults(merged, &descriptor.schema, &descriptor.computed)?;
                    check_uniqueness(descriptor, &working, &validated, Some(&id_key))?;
                    let changed: BTreeSet<String> = descriptor
                        .schema
                        .keys()
                        .filter(|f| current.get(f) != validated.get(f.as_str()))
                        .cloned()
                        .collect();
                    check_foreign_keys(&self.collections_view(), descriptor, &validated, Some(&changed))?;
                    let mut data =
                        hooks::run_before_chain(&self.registry().global_hooks().before_update, collection, validated).await?;
                    data = hooks::run_before_chain(&descriptor.hooks.before_update, collection, data).await?;
                    working.insert(id_key.clone(), Arc::new(Entity(data.clone())));
                    prepared.push(Prepared::Updated(id_key, data));
                }
                None => {
                    let (id, validated) = self.prepare_create(descriptor, entry.create, &working)?;
                    let mut data =
                        hooks::run_before_chain(&self.registry().global_hooks().before_create, collection, validated).await?;
                    data = hooks::run_before_chain(&descriptor.hooks.before_create, collection, data).await?;
                    let id_key = EntityId::from(id);
                    working.insert(id_key.clone(), Arc::new(Entity(data.clone())));
                    prepared.push(Prepared::Created(id_key, data));
                }
            }
        }

        state.update(|mut map| {
            for item in &prepared {
                match item {
                    Prepared::Created(id, data) | Prepared::Updated(id, data) => {
                        map.insert(id.clone(), Arc::new(Entity(data.clone())));
                    }
                    Prepared::Unchanged(_) => {}
                }
            }
            map
        });

        let mut summary = UpsertManySummary::default();
        for item in prepared {
            match item {
                Prepared::Created(_, data) => {
                    hooks::run_after_chain(&self.registry().global_hooks().after_create, collection, &data).await?;
                    hooks::run_after_chain(&descriptor.hooks.after_create, collection, &data).await?;
                    hooks::run_change_chain(
                        &self.registry().global_hooks().on_change,
                        &ChangeEvent {
                            collection: collection.to_string(),
                            kind: ChangeKind::Create,
                            entity: data.clone(),
                        },
                    )
                    .await?;
                    summary.created.push(data);
                }
                Prepared::Updated(_, data) => {
                    hooks::run_after_chain(&self.registry().global_hooks().after_update, collection, &data).await?;
                    hooks::run_after_chain(&descriptor.hooks.after_update, collection, &data).await?;
                    hooks::run_change_chain(
                        &self.registry().global_hooks().on_change,
                        &ChangeEvent {
                            collection: collection.to_string(),
                            kind: ChangeKind::Update,
                            entity: data.clone(),
                        },
                    )
                    .await?;
                    summary.updated.push(data);
                }
                Prepared::Unchanged(data) => summary.unchanged.push(data),
            }
        }
        self.schedule_persist(collection);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, QueryValue)]) -> QueryValue {
        QueryValue::Record(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn deep_merge_preserves_sibling_fields() {
        let current = record(&[(
            "metadata",
            record(&[
                ("views", QueryValue::Number(150.0)),
                ("rating", QueryValue::Number(5.0)),
                (
                    "tags",
                    QueryValue::Seq(vec![QueryValue::Text("classic".into()), QueryValue::Text("epic".into())]),
                ),
            ]),
        )]);
        let patch = record(&[("metadata", record(&[("views", QueryValue::Number(500.0))]))]);
        let merged = apply_patch(&current, &patch).unwrap();
        let metadata = merged.as_record().unwrap().get("metadata").unwrap().as_record().unwrap();
        assert_eq!(metadata.get("views").unwrap().as_number(), Some(500.0));
        assert_eq!(metadata.get("rating").unwrap().as_number(), Some(5.0));
        assert_eq!(metadata.get("tags").unwrap().as_seq().unwrap().len(), 2);
    }

    #[test]
    fn increment_operator_adjusts_number() {
        let current = record(&[("views", QueryValue::Number(10.0))]);
        let mut ops = FieldMap::new();
        ops.insert("$increment".into(), QueryValue::Number(5.0));
        let patch = record(&[("views", QueryValue::Record(ops))]);
        let merged = apply_patch(&current, &patch).unwrap();
        assert_eq!(merged.as_record().unwrap().get("views").unwrap().as_number(), Some(15.0));
    }

    #[test]
    fn mixing_operator_and_plain_keys_is_rejected() {
        let current = record(&[("views", QueryValue::Number(10.0))]);
        let mut mixed = FieldMap::new();
        mixed.insert("$set".into(), QueryValue::Number(1.0));
        mixed.insert("other".into(), QueryValue::Number(2.0));
        let patch = QueryValue::Record(mixed);
        assert!(apply_patch(&current, &patch).is_err());
    }

    #[test]
    fn operator_based_patch_is_detected() {
        let mut ops = FieldMap::new();
        ops.insert("$toggle".into(), QueryValue::Bool(true));
        let patch = record(&[("active", QueryValue::Record(ops))]);
        assert!(contains_operator(&patch));
        assert!(!contains_operator(&record(&[("active", QueryValue::Bool(true))])));
    }
}
