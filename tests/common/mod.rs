//! Shared fixtures for the integration tests (not a test binary itself —
//! each test file pulls this in with `mod common;`).

use std::sync::Arc;

use haven::{
    CollectionDescriptor, ComputedField, Database, DatabaseConfig, FieldMap, FieldSchema, FieldType, Plugin,
    QueryValue, RelationshipDef, RelationshipKind, UniqueConstraint,
};

pub fn text(s: &str) -> QueryValue {
    QueryValue::Text(s.to_string())
}

pub fn num(n: f64) -> QueryValue {
    QueryValue::Number(n)
}

pub fn field(pairs: &[(&str, QueryValue)]) -> FieldMap {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// `books` with `displayName = "{title} ({year})"` and `isClassic = year < 1980`.
pub fn books_descriptor() -> CollectionDescriptor {
    let mut schema = haven::CollectionSchema::new();
    schema.insert("title".into(), FieldSchema::required(FieldType::String));
    schema.insert("year".into(), FieldSchema::required(FieldType::Number));
    schema.insert("authorId".into(), FieldSchema::optional(FieldType::String));
    schema.insert(
        "deletedAt".into(),
        FieldSchema::optional(FieldType::String).with_default(QueryValue::Null),
    );

    let mut descriptor = CollectionDescriptor::new("books", schema);
    descriptor.computed.insert(
        "displayName".into(),
        ComputedField {
            depends_on_populate: Vec::new(),
            func: Arc::new(|fields, _populated| {
                let title = fields.get("title").and_then(|v| v.as_text()).unwrap_or_default();
                let year = fields.get("year").and_then(|v| v.as_number()).unwrap_or_default();
                QueryValue::Text(format!("{title} ({})", year as i64))
            }),
        },
    );
    descriptor.computed.insert(
        "isClassic".into(),
        ComputedField {
            depends_on_populate: Vec::new(),
            func: Arc::new(|fields, _populated| {
                let year = fields.get("year").and_then(|v| v.as_number()).unwrap_or_default();
                QueryValue::Bool(year < 1980.0)
            }),
        },
    );
    descriptor.relationships.insert(
        "author".into(),
        RelationshipDef {
            kind: RelationshipKind::Ref,
            target: "authors".into(),
            foreign_key: "authorId".into(),
        },
    );
    descriptor.unique_fields.push(UniqueConstraint::single("title"));
    descriptor
}

pub fn authors_descriptor() -> CollectionDescriptor {
    let mut schema = haven::CollectionSchema::new();
    schema.insert("name".into(), FieldSchema::required(FieldType::String));
    let mut descriptor = CollectionDescriptor::new("authors", schema);
    descriptor.relationships.insert(
        "books".into(),
        RelationshipDef {
            kind: RelationshipKind::Inverse,
            target: "books".into(),
            foreign_key: "authorId".into(),
        },
    );
    descriptor
}

/// `notes` with a `metadata` record field, used for deep-merge tests.
pub fn notes_descriptor() -> CollectionDescriptor {
    let mut metadata_schema = haven::CollectionSchema::new();
    metadata_schema.insert("views".into(), FieldSchema::required(FieldType::Number));
    metadata_schema.insert("rating".into(), FieldSchema::required(FieldType::Number));
    metadata_schema.insert(
        "tags".into(),
        FieldSchema::required(FieldType::Array(Box::new(FieldType::String))),
    );

    let mut schema = haven::CollectionSchema::new();
    schema.insert("title".into(), FieldSchema::required(FieldType::String));
    schema.insert("metadata".into(), FieldSchema::required(FieldType::Record(metadata_schema)));
    schema.insert(
        "deletedAt".into(),
        FieldSchema::optional(FieldType::String).with_default(QueryValue::Null),
    );
    CollectionDescriptor::new("notes", schema)
}

/// `items` with a plain string `id`-like `sku` primary sort key, for cursor tests.
pub fn items_descriptor() -> CollectionDescriptor {
    let mut schema = haven::CollectionSchema::new();
    schema.insert("label".into(), FieldSchema::optional(FieldType::String));
    CollectionDescriptor::new("items", schema)
}

pub async fn build_db(collections: Vec<CollectionDescriptor>) -> Arc<Database> {
    build_db_with_plugins(collections, Vec::new()).await
}

pub async fn build_db_with_plugins(collections: Vec<CollectionDescriptor>, plugins: Vec<Arc<dyn Plugin>>) -> Arc<Database> {
    let mut config = DatabaseConfig::new();
    for descriptor in collections {
        config = config.with_collection(descriptor);
    }
    for plugin in plugins {
        config = config.with_plugin(plugin);
    }
    Database::build(config).await.expect("database builds")
}
