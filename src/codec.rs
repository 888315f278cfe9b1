//! Format codec collaborator (`spec.md §6`).
//!
//! A codec encodes/decodes a plain record-of-records keyed by id — the
//! on-disk representation of one collection. Pinned but uninteresting: the
//! engine never inspects the encoded bytes, only calls through this trait.

use std::collections::BTreeMap;

use crate::error::DbError;
use crate::value::QueryValue;

/// Data is a plain record-of-records keyed by id (`spec.md §6`).
pub type CodecData = BTreeMap<String, QueryValue>;

pub trait FormatCodec: Send + Sync {
    fn name(&self) -> &str;
    fn extensions(&self) -> &[&str];
    fn encode(&self, data: &CodecData) -> Result<String, DbError>;
    fn decode(&self, raw: &str) -> Result<CodecData, DbError>;
}

pub struct JsonCodec;

impl FormatCodec for JsonCodec {
    fn name(&self) -> &str {
        "json"
    }

    fn extensions(&self) -> &[&str] {
        &["json"]
    }

    fn encode(&self, data: &CodecData) -> Result<String, DbError> {
        let json: serde_json::Map<String, serde_json::Value> =
            data.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
        serde_json::to_string_pretty(&json)
            .map_err(|e| DbError::Serialization(e.to_string()).log_and_return())
    }

    fn decode(&self, raw: &str) -> Result<CodecData, DbError> {
        let json: serde_json::Map<String, serde_json::Value> = if raw.trim().is_empty() {
            serde_json::Map::new()
        } else {
            serde_json::from_str(raw).map_err(|e| DbError::Serialization(e.to_string()).log_and_return())?
        };
        Ok(json
            .into_iter()
            .map(|(k, v)| (k, QueryValue::from_json(&v)))
            .collect())
    }
}

pub struct YamlCodec;

impl FormatCodec for YamlCodec {
    fn name(&self) -> &str {
        "yaml"
    }

    fn extensions(&self) -> &[&str] {
        &["yaml", "yml"]
    }

    fn encode(&self, data: &CodecData) -> Result<String, DbError> {
        let json: serde_json::Map<String, serde_json::Value> =
            data.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
        serde_yaml::to_string(&json).map_err(|e| DbError::Serialization(e.to_string()).log_and_return())
    }

    fn decode(&self, raw: &str) -> Result<CodecData, DbError> {
        let value: serde_yaml::Value = if raw.trim().is_empty() {
            serde_yaml::Value::Mapping(Default::default())
        } else {
            serde_yaml::from_str(raw).map_err(|e| DbError::Serialization(e.to_string()).log_and_return())?
        };
        let json: serde_json::Value = serde_json::to_value(value)
            .map_err(|e| DbError::Serialization(e.to_string()).log_and_return())?;
        match json {
            serde_json::Value::Object(map) => Ok(map
                .into_iter()
                .map(|(k, v)| (k, QueryValue::from_json(&v)))
                .collect()),
            serde_json::Value::Null => Ok(CodecData::new()),
            other => Err(DbError::Serialization(format!(
                "expected a mapping at the document root, got {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CodecData {
        let mut map = CodecData::new();
        map.insert(
            "book-1".into(),
            QueryValue::from_json(&serde_json::json!({"title": "Dune", "year": 1965})),
        );
        map
    }

    #[test]
    fn json_round_trip() {
        let codec = JsonCodec;
        let encoded = codec.encode(&sample()).unwrap();
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn yaml_round_trip() {
        let codec = YamlCodec;
        let encoded = codec.encode(&sample()).unwrap();
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, sample());
    }
}
