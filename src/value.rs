//! The runtime value representation shared by stored fields, computed
//! fields, filter operands, and patch leaves.
//!
//! `QueryValue` is the tagged union named in `spec.md §9`:
//! `Null | Bool | Number | Text | Seq | Record`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

pub type FieldMap = BTreeMap<String, QueryValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Seq(Vec<QueryValue>),
    Record(FieldMap),
}

/// The runtime type tags a [`crate::plugin::CustomOperator`] can declare
/// support for, per `spec.md §4.3` (`{string, number, boolean}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueTypeTag {
    String,
    Number,
    Boolean,
}

impl QueryValue {
    pub fn type_tag(&self) -> Option<ValueTypeTag> {
        match self {
            QueryValue::Text(_) => Some(ValueTypeTag::String),
            QueryValue::Number(_) => Some(ValueTypeTag::Number),
            QueryValue::Bool(_) => Some(ValueTypeTag::Boolean),
            QueryValue::Null | QueryValue::Seq(_) | QueryValue::Record(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, QueryValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            QueryValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            QueryValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            QueryValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[QueryValue]> {
        match self {
            QueryValue::Seq(s) => Some(s.as_slice()),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&FieldMap> {
        match self {
            QueryValue::Record(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut FieldMap> {
        match self {
            QueryValue::Record(m) => Some(m),
            _ => None,
        }
    }

    /// Stringify the value for use as a cursor key, per `spec.md §4.5`
    /// ("numbers/booleans stringified").
    pub fn cursor_string(&self) -> Option<String> {
        match self {
            QueryValue::Text(s) => Some(s.clone()),
            QueryValue::Number(n) => Some(format_number(*n)),
            QueryValue::Bool(b) => Some(b.to_string()),
            QueryValue::Null | QueryValue::Seq(_) | QueryValue::Record(_) => None,
        }
    }

    /// Ordering used by the sort stage (`spec.md §4.4` step 6): numbers
    /// numerically, strings by code-unit order, booleans false < true,
    /// null/undefined sort to the end regardless of direction.
    pub fn sort_key_cmp(&self, other: &QueryValue) -> Ordering {
        match (self, other) {
            (QueryValue::Null, QueryValue::Null) => Ordering::Equal,
            (QueryValue::Null, _) => Ordering::Greater,
            (_, QueryValue::Null) => Ordering::Less,
            (QueryValue::Number(a), QueryValue::Number(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (QueryValue::Text(a), QueryValue::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            (QueryValue::Bool(a), QueryValue::Bool(b)) => a.cmp(b),
            // Mixed/unsortable types: treat as equal, stability preserves order.
            _ => Ordering::Equal,
        }
    }

    pub fn from_json(value: &JsonValue) -> QueryValue {
        match value {
            JsonValue::Null => QueryValue::Null,
            JsonValue::Bool(b) => QueryValue::Bool(*b),
            JsonValue::Number(n) => QueryValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => QueryValue::Text(s.clone()),
            JsonValue::Array(items) => {
                QueryValue::Seq(items.iter().map(QueryValue::from_json).collect())
            }
            JsonValue::Object(map) => QueryValue::Record(
                map.iter()
                    .map(|(k, v)| (k.clone(), QueryValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            QueryValue::Null => JsonValue::Null,
            QueryValue::Bool(b) => JsonValue::Bool(*b),
            QueryValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            QueryValue::Text(s) => JsonValue::String(s.clone()),
            QueryValue::Seq(items) => JsonValue::Array(items.iter().map(|v| v.to_json()).collect()),
            QueryValue::Record(map) => {
                JsonValue::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
