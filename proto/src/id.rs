use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a record within its collection.
///
/// The backend keys rows either by `bigint` or by text (usually a uuid), so both
/// encodings are carried as-is. Serialized untagged, exactly as the JSON value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    /// Read an identifier out of a JSON value, if it is a usable key
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(RecordId::Int),
            serde_json::Value::String(s) => Some(RecordId::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            RecordId::Int(i) => serde_json::Value::from(*i),
            RecordId::Text(s) => serde_json::Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(i) => write!(f, "{}", i),
            RecordId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(val: i64) -> Self { RecordId::Int(val) }
}

impl From<i32> for RecordId {
    fn from(val: i32) -> Self { RecordId::Int(val as i64) }
}

impl From<&str> for RecordId {
    fn from(val: &str) -> Self { RecordId::Text(val.to_string()) }
}

impl From<String> for RecordId {
    fn from(val: String) -> Self { RecordId::Text(val) }
}

impl From<&RecordId> for RecordId {
    fn from(val: &RecordId) -> Self { val.clone() }
}
