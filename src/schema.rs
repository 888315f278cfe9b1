//! Declarative entity shape and validation (`spec.md §3`, `§4.1`).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{DbError, ValidationIssue};
use crate::hooks::{AfterHook, BeforeHook};
use crate::value::{FieldMap, QueryValue, ValueTypeTag};

/// The shape of a single field. Mirrors `spec.md §3`: scalars, ordered
/// sequences, or nested records.
#[derive(Debug, Clone)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Null,
    Array(Box<FieldType>),
    Record(CollectionSchema),
    /// Accepts any shape; used for fields the embedder does not want to
    /// constrain further (e.g. opaque metadata blobs).
    Any,
}

#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub ty: FieldType,
    pub optional: bool,
    pub default: Option<QueryValue>,
}

impl FieldSchema {
    pub fn required(ty: FieldType) -> Self {
        Self {
            ty,
            optional: false,
            default: None,
        }
    }

    pub fn optional(ty: FieldType) -> Self {
        Self {
            ty,
            optional: true,
            default: None,
        }
    }

    pub fn with_default(mut self, default: QueryValue) -> Self {
        self.optional = true;
        self.default = Some(default);
        self
    }
}

pub type CollectionSchema = BTreeMap<String, FieldSchema>;

/// `uniqueFields`: a unique constraint over one or more field names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct UniqueConstraint(pub Vec<String>);

impl UniqueConstraint {
    pub fn single(field: impl Into<String>) -> Self {
        Self(vec![field.into()])
    }

    pub fn composite(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(fields.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    /// `source.foreign_key` holds the id of the target entity.
    Ref,
    /// Derived: entities in `target` whose `foreign_key` equals this id.
    Inverse,
}

#[derive(Debug, Clone)]
pub struct RelationshipDef {
    pub kind: RelationshipKind,
    pub target: String,
    pub foreign_key: String,
}

/// A computed field's dependency on a populated relationship name, so the
/// query engine knows when population is required before derivation
/// (`spec.md §4.4` step 3).
pub type ComputedFn = Arc<dyn Fn(&FieldMap, &crate::relate::PopulatedView) -> QueryValue + Send + Sync>;

#[derive(Clone)]
pub struct ComputedField {
    pub depends_on_populate: Vec<String>,
    pub func: ComputedFn,
}

impl std::fmt::Debug for ComputedField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputedField")
            .field("depends_on_populate", &self.depends_on_populate)
            .finish()
    }
}

#[derive(Default)]
pub struct HookSet {
    pub before_create: Vec<Arc<dyn BeforeHook>>,
    pub after_create: Vec<Arc<dyn AfterHook>>,
    pub before_update: Vec<Arc<dyn BeforeHook>>,
    pub after_update: Vec<Arc<dyn AfterHook>>,
    pub before_delete: Vec<Arc<dyn BeforeHook>>,
    pub after_delete: Vec<Arc<dyn AfterHook>>,
}

/// Immutable-after-build collection descriptor (`spec.md §3`).
pub struct CollectionDescriptor {
    pub name: String,
    pub schema: CollectionSchema,
    pub unique_fields: Vec<UniqueConstraint>,
    pub relationships: BTreeMap<String, RelationshipDef>,
    pub computed: BTreeMap<String, ComputedField>,
    pub hooks: HookSet,
    pub id_generator: Option<String>,
    pub file: Option<std::path::PathBuf>,
}

impl CollectionDescriptor {
    pub fn new(name: impl Into<String>, schema: CollectionSchema) -> Self {
        Self {
            name: name.into(),
            schema,
            unique_fields: Vec::new(),
            relationships: BTreeMap::new(),
            computed: BTreeMap::new(),
            hooks: HookSet::default(),
            id_generator: None,
            file: None,
        }
    }

    pub fn has_field(&self, name: &str) -> bool {
        name == "id" || self.schema.contains_key(name) || self.computed.contains_key(name)
    }

    pub fn declares_deleted_at(&self) -> bool {
        self.schema.contains_key("deletedAt")
    }
}

/// Validate a raw field map against `schema`, applying defaults and
/// stripping declared computed-field keys (`spec.md §4.1`, `§4.7`).
///
/// Unknown top-level keys that are neither schema fields nor computed
/// field names are rejected.
pub fn validate_and_apply_defaults(
    raw: FieldMap,
    schema: &CollectionSchema,
    computed: &BTreeMap<String, ComputedField>,
) -> Result<FieldMap, DbError> {
    let mut issues = Vec::new();
    let mut out = FieldMap::new();

    for (key, value) in raw {
        if computed.contains_key(&key) {
            continue; // silently stripped, spec.md §4.7
        }
        if key == "id" {
            out.insert(key, value);
            continue;
        }
        match schema.get(&key) {
            Some(field_schema) => match check_type(&value, &field_schema.ty, &key) {
                Ok(()) => {
                    out.insert(key, value);
                }
                Err(issue) => issues.push(issue),
            },
            None => issues.push(ValidationIssue::new(
                key.clone(),
                "field is not declared on this collection's schema",
            )),
        }
    }

    for (name, field_schema) in schema {
        if out.contains_key(name) {
            continue;
        }
        if let Some(default) = &field_schema.default {
            out.insert(name.clone(), default.clone());
        } else if !field_schema.optional {
            issues.push(ValidationIssue::new(name.clone(), "required field is missing"));
        }
    }

    if issues.is_empty() {
        Ok(out)
    } else {
        Err(DbError::validation(issues))
    }
}

fn check_type(value: &QueryValue, ty: &FieldType, path: &str) -> Result<(), ValidationIssue> {
    let matches = match (ty, value) {
        (FieldType::Any, _) => true,
        (FieldType::Null, QueryValue::Null) => true,
        (FieldType::String, QueryValue::Text(_)) => true,
        (FieldType::Number, QueryValue::Number(_)) => true,
        (FieldType::Boolean, QueryValue::Bool(_)) => true,
        (FieldType::Array(inner), QueryValue::Seq(items)) => {
            return items
                .iter()
                .enumerate()
                .try_for_each(|(i, item)| check_type(item, inner, &format!("{path}[{i}]")));
        }
        (FieldType::Record(sub_schema), QueryValue::Record(fields)) => {
            let sub = validate_and_apply_defaults(
                fields.clone(),
                sub_schema,
                &BTreeMap::new(),
            )
            .map_err(|e| match e {
                DbError::Validation(mut v) => v.pop().unwrap_or_else(|| {
                    ValidationIssue::new(path, "nested record validation failed")
                }),
                _ => ValidationIssue::new(path, "nested record validation failed"),
            });
            return sub.map(|_| ());
        }
        _ => false,
    };

    if matches {
        Ok(())
    } else {
        Err(ValidationIssue::new(
            path,
            format!("type mismatch: value does not satisfy declared field type"),
        ))
    }
}

/// Field names referenced anywhere that unique constraints are not allowed
/// to collide on soft-deleted entities (`spec.md §4.7`: "Uniqueness
/// enforcement treats soft-deleted entities as absent").
pub fn unique_field_names(constraints: &[UniqueConstraint]) -> BTreeSet<&str> {
    constraints
        .iter()
        .flat_map(|c| c.0.iter().map(String::as_str))
        .collect()
}

pub fn operator_type_allowed(tag: ValueTypeTag, declared: &[ValueTypeTag]) -> bool {
    declared.contains(&tag)
}
