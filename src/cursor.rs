//! Cursor pager (C5, `spec.md §4.5`): a variant of the query pipeline that
//! produces `{items, pageInfo}` with forward/backward stability instead of
//! `offset`/`limit`.

use std::cmp::Ordering;

use crate::db::CollectionsView;
use crate::error::{DbError, ValidationIssue};
use crate::plugin::PluginRegistry;
use crate::query::{self, QuerySpec, SortDir};
use crate::value::FieldMap;

#[derive(Debug, Clone)]
pub struct Cursor {
    pub key: String,
    pub limit: u32,
    pub after: Option<String>,
    pub before: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PageInfo {
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<FieldMap>,
    pub page_info: PageInfo,
}

fn validate_cursor(
    descriptor: &crate::schema::CollectionDescriptor,
    cursor: &Cursor,
    sort: &[(String, SortDir)],
) -> Result<(), DbError> {
    let mut issues = Vec::new();
    if cursor.after.is_some() && cursor.before.is_some() {
        issues.push(ValidationIssue::new("cursor", "after and before are mutually exclusive"));
    }
    if cursor.limit == 0 {
        issues.push(ValidationIssue::new("cursor.limit", "must be greater than zero"));
    }
    if !descriptor.has_field(&cursor.key) {
        issues.push(ValidationIssue::new("cursor.key", "unknown field"));
    }
    if let Some((first, _)) = sort.first() {
        if first != &cursor.key {
            issues.push(ValidationIssue::new(
                "cursor.key",
                "must be the primary (first) sort field when a sort is supplied",
            ));
        }
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(DbError::validation(issues))
    }
}

/// Best-effort typed reconstruction of an opaque cursor token, used only to
/// find the insertion point for a value that is not present in the
/// candidate sequence (`spec.md §4.5`: "after the position where `c` would
/// have appeared in sort order").
fn synthetic_value(raw: &str) -> crate::value::QueryValue {
    use crate::value::QueryValue;
    if let Ok(n) = raw.parse::<f64>() {
        return QueryValue::Number(n);
    }
    match raw {
        "true" => QueryValue::Bool(true),
        "false" => QueryValue::Bool(false),
        _ => QueryValue::Text(raw.to_string()),
    }
}

pub fn run(
    collections: &CollectionsView<'_>,
    collection: &str,
    cursor: &Cursor,
    base: &QuerySpec,
    registry: &PluginRegistry,
) -> Result<Page, DbError> {
    let descriptor = collections.descriptor(collection)?;
    let effective_sort = if base.sort.is_empty() {
        vec![(cursor.key.clone(), SortDir::Asc)]
    } else {
        base.sort.clone()
    };
    validate_cursor(descriptor, cursor, &effective_sort)?;

    let scan_spec = QuerySpec {
        where_: base.where_.clone(),
        sort: effective_sort.clone(),
        offset: None,
        limit: None,
        select: None,
        populate: base.populate.clone(),
        include_soft_deleted: base.include_soft_deleted,
    };
    let candidates = query::build_candidates(collections, collection, &scan_spec)?;
    let mut candidates = query::filter_candidates(candidates, &base.where_, registry);
    query::sort_candidates(&mut candidates, &effective_sort);

    let dir = effective_sort[0].1;
    let key_of = |c: &query::Candidate| query::resolve_field(c, &cursor.key).cursor_string();

    let limit = cursor.limit as usize;
    let len = candidates.len();

    let (start, end) = if let Some(after) = &cursor.after {
        let idx = candidates.iter().position(|c| key_of(c).as_deref() == Some(after.as_str()));
        let from = match idx {
            Some(i) => i + 1,
            None => {
                let synth = synthetic_value(after);
                candidates
                    .iter()
                    .take_while(|c| {
                        let v = query::resolve_field(c, &cursor.key);
                        query::directional_cmp(&v, &synth, dir) == Ordering::Less
                    })
                    .count()
            }
        };
        (from.min(len), (from + limit).min(len))
    } else if let Some(before) = &cursor.before {
        let idx = candidates.iter().position(|c| key_of(c).as_deref() == Some(before.as_str()));
        let upto = match idx {
            Some(i) => i,
            None => {
                let synth = synthetic_value(before);
                candidates
                    .iter()
                    .take_while(|c| {
                        let v = query::resolve_field(c, &cursor.key);
                        query::directional_cmp(&v, &synth, dir) != Ordering::Greater
                    })
                    .count()
            }
        };
        (upto.saturating_sub(limit), upto)
    } else {
        (0, limit.min(len))
    };

    let slice = &candidates[start..end];
    let items: Vec<FieldMap> = slice.iter().map(|c| query::project(c, &base.select, descriptor)).collect();

    let page_info = if slice.is_empty() {
        PageInfo::default()
    } else {
        PageInfo {
            start_cursor: slice.first().and_then(key_of),
            end_cursor: slice.last().and_then(key_of),
            has_next_page: end < len,
            has_previous_page: start > 0,
        }
    };

    Ok(Page { items, page_info })
}
