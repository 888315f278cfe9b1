//! Query engine (C4, `spec.md §4.4`): a fixed eight-stage pipeline over a
//! snapshotted collection, generalized from the teacher's declarative
//! `QueryF`/`Query` free-monad shape (`src/orm/query.rs`) — here the "query"
//! is plain data (`QuerySpec`) interpreted directly against an in-memory
//! snapshot instead of compiled to SQL.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::collection::Entity;
use crate::db::CollectionsView;
use crate::error::{DbError, ValidationIssue};
use crate::operators::evaluate_builtin;
use crate::plugin::PluginRegistry;
use crate::relate::{populate_entity, PopulatedEntity, PopulatedValue, PopulatedView};
use crate::schema::CollectionDescriptor;
use crate::value::{FieldMap, QueryValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub enum FieldFilter {
    Eq(QueryValue),
    Ops(Vec<(String, QueryValue)>),
}

pub type WhereClause = BTreeMap<String, FieldFilter>;

#[derive(Debug, Clone)]
pub enum Select {
    Fields(Vec<String>),
}

#[derive(Debug, Clone)]
pub enum PopulateSpec {
    Include,
    Nested(PopulateMap),
}

pub type PopulateMap = BTreeMap<String, PopulateSpec>;

#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub where_: Option<WhereClause>,
    pub sort: Vec<(String, SortDir)>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub select: Option<Select>,
    pub populate: PopulateMap,
    pub include_soft_deleted: bool,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }
}

/// One candidate entity mid-pipeline: the stored entity plus whatever this
/// query populated and computed for it.
#[derive(Clone)]
pub struct Candidate {
    pub entity: Arc<Entity>,
    pub populated: PopulatedView,
    pub computed: FieldMap,
}

pub fn validate_query(descriptor: &CollectionDescriptor, spec: &QuerySpec) -> Result<(), DbError> {
    let mut issues = Vec::new();
    for (field, _) in &spec.sort {
        if !descriptor.has_field(field) {
            issues.push(ValidationIssue::new(field.clone(), "unknown sort field"));
        }
    }
    if let Some(Select::Fields(fields)) = &spec.select {
        for field in fields {
            if field != "id"
                && !descriptor.has_field(field)
                && !descriptor.relationships.contains_key(field)
            {
                issues.push(ValidationIssue::new(field.clone(), "unknown select field"));
            }
        }
    }
    for rel_name in spec.populate.keys() {
        if !descriptor.relationships.contains_key(rel_name) {
            issues.push(ValidationIssue::new(rel_name.clone(), "unknown relationship"));
        }
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(DbError::validation(issues))
    }
}

fn needed_computed_fields(descriptor: &CollectionDescriptor, spec: &QuerySpec) -> Vec<String> {
    let mut needed = std::collections::BTreeSet::new();
    if let Some(where_) = &spec.where_ {
        for key in where_.keys() {
            if descriptor.computed.contains_key(key) {
                needed.insert(key.clone());
            }
        }
    }
    for (key, _) in &spec.sort {
        if descriptor.computed.contains_key(key) {
            needed.insert(key.clone());
        }
    }
    match &spec.select {
        Some(Select::Fields(fields)) => {
            for field in fields {
                if descriptor.computed.contains_key(field) {
                    needed.insert(field.clone());
                }
            }
        }
        None => needed.extend(descriptor.computed.keys().cloned()),
    }
    needed.into_iter().collect()
}

fn needed_populate(descriptor: &CollectionDescriptor, spec: &QuerySpec, needed_computed: &[String]) -> PopulateMap {
    let mut populate = spec.populate.clone();
    for name in needed_computed {
        if let Some(field) = descriptor.computed.get(name) {
            for dep in &field.depends_on_populate {
                populate.entry(dep.clone()).or_insert(PopulateSpec::Include);
            }
        }
    }
    populate
}

/// Stages 1-4: snapshot, soft-delete filter, populate on demand, derive
/// computed fields.
pub fn build_candidates(
    collections: &CollectionsView<'_>,
    collection: &str,
    spec: &QuerySpec,
) -> Result<Vec<Candidate>, DbError> {
    let descriptor = collections.descriptor(collection)?;
    let state = collections.state(collection)?;
    let snapshot = state.read();

    let needed_computed = needed_computed_fields(descriptor, spec);
    let populate_map = needed_populate(descriptor, spec, &needed_computed);

    let mut candidates = Vec::with_capacity(snapshot.len());
    for entity in snapshot.values() {
        if entity.is_soft_deleted() && !spec.include_soft_deleted {
            continue;
        }
        let populated = if populate_map.is_empty() {
            PopulatedView::new()
        } else {
            populate_entity(collections, collection, entity, &populate_map, 0)?
        };
        let mut computed = FieldMap::new();
        for name in &needed_computed {
            if let Some(field) = descriptor.computed.get(name) {
                computed.insert(name.clone(), (field.func)(entity.fields(), &populated));
            }
        }
        candidates.push(Candidate {
            entity: entity.clone(),
            populated,
            computed,
        });
    }
    Ok(candidates)
}

pub fn resolve_field(candidate: &Candidate, field: &str) -> QueryValue {
    if let Some(v) = candidate.computed.get(field) {
        return v.clone();
    }
    candidate.entity.get(field).cloned().unwrap_or(QueryValue::Null)
}

/// Stage 5: filter.
pub fn filter_candidates(
    candidates: Vec<Candidate>,
    where_: &Option<WhereClause>,
    registry: &PluginRegistry,
) -> Vec<Candidate> {
    let Some(where_) = where_ else {
        return candidates;
    };
    candidates
        .into_iter()
        .filter(|candidate| {
            where_.iter().all(|(field, filter)| {
                let value = resolve_field(candidate, field);
                match filter {
                    FieldFilter::Eq(operand) => {
                        evaluate_builtin("$eq", &value, operand).unwrap_or(false)
                    }
                    FieldFilter::Ops(ops) => ops.iter().all(|(op_name, operand)| {
                        evaluate_operator(registry, op_name, &value, operand)
                    }),
                }
            })
        })
        .collect()
}

fn evaluate_operator(registry: &PluginRegistry, op_name: &str, value: &QueryValue, operand: &QueryValue) -> bool {
    if let Some(result) = evaluate_builtin(op_name, value, operand) {
        return result;
    }
    match registry.operator(op_name) {
        Some(custom) => match value.type_tag() {
            Some(tag) if custom.types().contains(&tag) => custom.evaluate(value, operand),
            Some(_) => true, // type not declared: silently ignored, as if absent
            None if value.is_null() => false,
            None => true,
        },
        // Unknown operator name: treated as if the clause were absent.
        None => true,
    }
}

pub(crate) fn directional_cmp(a: &QueryValue, b: &QueryValue, dir: SortDir) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let cmp = a.sort_key_cmp(b);
            if dir == SortDir::Desc {
                cmp.reverse()
            } else {
                cmp
            }
        }
    }
}

/// Stage 6: stable sort.
pub fn sort_candidates(candidates: &mut [Candidate], sort: &[(String, SortDir)]) {
    candidates.sort_by(|a, b| {
        for (field, dir) in sort {
            let av = resolve_field(a, field);
            let bv = resolve_field(b, field);
            let cmp = directional_cmp(&av, &bv, *dir);
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        Ordering::Equal
    });
}

/// Stage 7: paginate.
pub fn paginate(candidates: Vec<Candidate>, offset: Option<u64>, limit: Option<u64>) -> Vec<Candidate> {
    let offset = offset.unwrap_or(0) as usize;
    let iter = candidates.into_iter().skip(offset);
    match limit {
        Some(limit) => iter.take(limit as usize).collect(),
        None => iter.collect(),
    }
}

pub fn populated_value_to_query_value(value: &PopulatedValue) -> QueryValue {
    match value {
        PopulatedValue::Ref(Some(entity)) => populated_entity_to_query_value(entity),
        PopulatedValue::Ref(None) => QueryValue::Null,
        PopulatedValue::Inverse(items) => {
            QueryValue::Seq(items.iter().map(populated_entity_to_query_value).collect())
        }
    }
}

fn populated_entity_to_query_value(populated: &PopulatedEntity) -> QueryValue {
    let mut fields = populated.entity.fields().clone();
    for (rel_name, nested_value) in &populated.nested {
        fields.insert(rel_name.clone(), populated_value_to_query_value(nested_value));
    }
    QueryValue::Record(fields)
}

/// Stage 8: select/project. An explicit field list emits exactly those
/// fields; `id` is only force-included when `select` is absent, per
/// `spec.md §8` scenario 1 ("select with an explicit field list returns
/// rows with only those keys").
pub fn project(candidate: &Candidate, select: &Option<Select>, descriptor: &CollectionDescriptor) -> FieldMap {
    let (names, force_id): (Vec<String>, bool) = match select {
        Some(Select::Fields(fields)) => (fields.clone(), false),
        None => {
            let mut all: Vec<String> = descriptor.schema.keys().cloned().collect();
            all.extend(descriptor.computed.keys().cloned());
            (all, true)
        }
    };

    let mut out = FieldMap::new();
    if force_id {
        out.insert(
            "id".into(),
            candidate.entity.get("id").cloned().unwrap_or(QueryValue::Null),
        );
    }
    for name in names {
        if name == "id" {
            out.insert("id".into(), candidate.entity.get("id").cloned().unwrap_or(QueryValue::Null));
            continue;
        }
        if let Some(value) = candidate.computed.get(&name) {
            out.insert(name, value.clone());
        } else if let Some(populated) = candidate.populated.get(&name) {
            out.insert(name, populated_value_to_query_value(populated));
        } else if let Some(value) = candidate.entity.get(&name) {
            out.insert(name, value.clone());
        }
    }
    out
}

/// Run the full pipeline, stages 1-8.
pub fn run(
    collections: &CollectionsView<'_>,
    collection: &str,
    spec: &QuerySpec,
    registry: &PluginRegistry,
) -> Result<Vec<FieldMap>, DbError> {
    let descriptor = collections.descriptor(collection)?;
    validate_query(descriptor, spec)?;

    let candidates = build_candidates(collections, collection, spec)?;
    let mut candidates = filter_candidates(candidates, &spec.where_, registry);
    sort_candidates(&mut candidates, &spec.sort);
    let candidates = paginate(candidates, spec.offset, spec.limit);

    Ok(candidates
        .iter()
        .map(|c| project(c, &spec.select, descriptor))
        .collect())
}
