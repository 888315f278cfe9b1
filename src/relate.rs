//! Relationship resolver (C9, `spec.md §4.9`).

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::collection::{Entity, EntityId};
use crate::db::CollectionsView;
use crate::error::DbError;
use crate::query::PopulateMap;
use crate::schema::RelationshipKind;

/// Maximum nested-populate depth before cycle-breaking (`spec.md §4.9`).
pub const MAX_POPULATE_DEPTH: usize = 8;

/// A populated entity together with whatever nested relationships were
/// themselves requested on it (`spec.md §4.9`: "for each resolved author,
/// populate its books in turn").
#[derive(Debug, Clone)]
pub struct PopulatedEntity {
    pub entity: Arc<Entity>,
    pub nested: PopulatedView,
}

#[derive(Debug, Clone)]
pub enum PopulatedValue {
    Ref(Option<PopulatedEntity>),
    Inverse(Vec<PopulatedEntity>),
}

/// What a computed function sees for relationship names it was told about.
/// Names not populated in the current query are simply absent from the map
/// — the computed function must treat that as `undefined` rather than
/// triggering a fetch (`spec.md §4.4` step 4, `§9`).
pub type PopulatedView = BTreeMap<String, PopulatedValue>;

/// Populate every relationship name the query touches (directly requested,
/// or depended on by a selected computed field) for one entity.
pub fn populate_entity(
    collections: &CollectionsView<'_>,
    collection: &str,
    entity: &Entity,
    populate: &PopulateMap,
    depth: usize,
) -> Result<PopulatedView, DbError> {
    let mut view = PopulatedView::new();
    if depth >= MAX_POPULATE_DEPTH {
        return Ok(view);
    }

    let descriptor = collections.descriptor(collection)?;
    for (rel_name, spec) in populate {
        let Some(rel) = descriptor.relationships.get(rel_name) else {
            continue;
        };
        let target_state = collections.state(&rel.target)?;
        let target_snapshot = target_state.read();

        let nested = match spec {
            crate::query::PopulateSpec::Include => PopulateMap::new(),
            crate::query::PopulateSpec::Nested(inner) => inner.clone(),
        };

        match rel.kind {
            RelationshipKind::Ref => {
                let target_id = entity.get(&rel.foreign_key).and_then(|v| v.as_text());
                let resolved_entity = target_id.and_then(|id| target_snapshot.get(&EntityId::from(id)).cloned());
                let resolved = match resolved_entity {
                    Some(resolved_entity) => {
                        let nested_view = populate_entity(
                            collections,
                            &rel.target,
                            &resolved_entity,
                            &nested,
                            depth + 1,
                        )?;
                        Some(PopulatedEntity {
                            entity: resolved_entity,
                            nested: nested_view,
                        })
                    }
                    None => None,
                };
                view.insert(rel_name.clone(), PopulatedValue::Ref(resolved));
            }
            RelationshipKind::Inverse => {
                let source_id = entity.id();
                let matches: Vec<Arc<Entity>> = target_snapshot
                    .values()
                    .filter(|candidate| {
                        candidate
                            .get(&rel.foreign_key)
                            .and_then(|v| v.as_text())
                            .map(|v| v == source_id.0)
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                let mut populated_matches = Vec::with_capacity(matches.len());
                for matched in matches {
                    let nested_view =
                        populate_entity(collections, &rel.target, &matched, &nested, depth + 1)?;
                    populated_matches.push(PopulatedEntity {
                        entity: matched,
                        nested: nested_view,
                    });
                }
                view.insert(rel_name.clone(), PopulatedValue::Inverse(populated_matches));
            }
        }
    }

    Ok(view)
}

/// Hard-delete FK check: refuse if any other collection has a live `ref`
/// relationship pointing at `id` (`spec.md §4.7`, `§4.9`).
pub fn blocking_referents(
    collections: &CollectionsView<'_>,
    target_collection: &str,
    id: &EntityId,
) -> Result<Vec<(String, String)>, DbError> {
    let mut blockers = Vec::new();
    for (name, descriptor) in collections.all_descriptors() {
        for (rel_name, rel) in &descriptor.relationships {
            if rel.kind != RelationshipKind::Ref || rel.target != target_collection {
                continue;
            }
            let state = collections.state(name)?;
            let snapshot = state.read();
            for candidate in snapshot.values() {
                if candidate.is_soft_deleted() {
                    continue;
                }
                if candidate
                    .get(&rel.foreign_key)
                    .and_then(|v| v.as_text())
                    .map(|v| v == id.0)
                    .unwrap_or(false)
                {
                    blockers.push((name.clone(), rel_name.clone()));
                }
            }
        }
    }
    Ok(blockers)
}
