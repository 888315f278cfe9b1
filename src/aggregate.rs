//! Aggregator (C6, `spec.md §4.6`): count/sum/avg/min/max/groupBy over the
//! filtered (and populated) result of a query.

use std::collections::BTreeMap;

use crate::db::CollectionsView;
use crate::error::DbError;
use crate::plugin::PluginRegistry;
use crate::query::{self, QuerySpec};
use crate::value::QueryValue;

#[derive(Debug, Clone)]
pub enum AggOp {
    Count,
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
}

impl AggOp {
    fn label(&self) -> String {
        match self {
            AggOp::Count => "count".to_string(),
            AggOp::Sum(f) => format!("sum_{f}"),
            AggOp::Avg(f) => format!("avg_{f}"),
            AggOp::Min(f) => format!("min_{f}"),
            AggOp::Max(f) => format!("max_{f}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregateSpec {
    pub aggs: Vec<AggOp>,
    pub group_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AggregateGroup {
    /// `None` when the aggregate is not grouped.
    pub key: Option<QueryValue>,
    pub values: BTreeMap<String, QueryValue>,
}

/// A stable bucket identity for a group key. `QueryValue` has no total
/// order/hash across variants, so grouping buckets on this string instead
/// and carries the original value alongside for output.
fn bucket_key(value: &QueryValue) -> String {
    match value {
        QueryValue::Null => "null".to_string(),
        QueryValue::Bool(b) => format!("b:{b}"),
        QueryValue::Number(n) => format!("n:{n}"),
        QueryValue::Text(s) => format!("s:{s}"),
        QueryValue::Seq(_) | QueryValue::Record(_) => "unsortable".to_string(),
    }
}

fn numbers_of<'a>(candidates: &'a [query::Candidate], field: &str) -> Vec<f64> {
    candidates
        .iter()
        .filter_map(|c| query::resolve_field(c, field).as_number())
        .collect()
}

fn apply_aggs(candidates: &[query::Candidate], aggs: &[AggOp]) -> BTreeMap<String, QueryValue> {
    let mut out = BTreeMap::new();
    for agg in aggs {
        let value = match agg {
            AggOp::Count => QueryValue::Number(candidates.len() as f64),
            AggOp::Sum(field) => QueryValue::Number(numbers_of(candidates, field).iter().sum()),
            AggOp::Avg(field) => {
                let nums = numbers_of(candidates, field);
                if nums.is_empty() {
                    QueryValue::Null
                } else {
                    QueryValue::Number(nums.iter().sum::<f64>() / nums.len() as f64)
                }
            }
            AggOp::Min(field) => numbers_of(candidates, field)
                .into_iter()
                .fold(None, |acc: Option<f64>, n| Some(acc.map_or(n, |a| a.min(n))))
                .map(QueryValue::Number)
                .unwrap_or(QueryValue::Null),
            AggOp::Max(field) => numbers_of(candidates, field)
                .into_iter()
                .fold(None, |acc: Option<f64>, n| Some(acc.map_or(n, |a| a.max(n))))
                .map(QueryValue::Number)
                .unwrap_or(QueryValue::Null),
        };
        out.insert(agg.label(), value);
    }
    out
}

pub fn run(
    collections: &CollectionsView<'_>,
    collection: &str,
    spec: &QuerySpec,
    agg: &AggregateSpec,
    registry: &PluginRegistry,
) -> Result<Vec<AggregateGroup>, DbError> {
    let candidates = query::build_candidates(collections, collection, spec)?;
    let candidates = query::filter_candidates(candidates, &spec.where_, registry);

    match &agg.group_by {
        None => Ok(vec![AggregateGroup {
            key: None,
            values: apply_aggs(&candidates, &agg.aggs),
        }]),
        Some(field) => {
            let mut buckets: BTreeMap<String, (QueryValue, Vec<query::Candidate>)> = BTreeMap::new();
            for candidate in candidates {
                let key = query::resolve_field(&candidate, field);
                let bucket = buckets
                    .entry(bucket_key(&key))
                    .or_insert_with(|| (key, Vec::new()));
                bucket.1.push(candidate);
            }
            Ok(buckets
                .into_values()
                .map(|(key, members)| AggregateGroup {
                    key: Some(key),
                    values: apply_aggs(&members, &agg.aggs),
                })
                .collect())
        }
    }
}
