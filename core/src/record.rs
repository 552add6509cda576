//! The validation boundary between network rows and typed records.

use kiln_proto::{ErrorBody, RecordId};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::RowError;

/// Name of the identifier column every collection carries
pub const ID_FIELD: &str = "id";

/// A row shape stored in a remote collection.
///
/// Implementors describe how to find their identifier and may add a runtime
/// validator; [`parse_row`] runs it on every row before the row reaches the caller.
///
/// ```rust
/// # use kiln_core::record::Record;
/// # use kiln_core::proto::RecordId;
/// # use serde::{Deserialize, Serialize};
/// #[derive(Debug, Serialize, Deserialize)]
/// pub struct Alert {
///     pub id: i64,
///     pub site: String,
///     pub level: u8,
/// }
///
/// impl Record for Alert {
///     fn id(&self) -> RecordId { self.id.into() }
///     fn validate(&self) -> Result<(), String> {
///         if self.level > 5 { return Err(format!("level {} out of range", self.level)) }
///         Ok(())
///     }
/// }
/// ```
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> RecordId;

    /// Runtime shape check beyond what deserialization enforces
    fn validate(&self) -> Result<(), String> { Ok(()) }
}

/// Untyped rows. The only requirement is a usable `id` field.
impl Record for Value {
    fn id(&self) -> RecordId { self.get(ID_FIELD).and_then(RecordId::from_json).unwrap_or_else(|| RecordId::Text(String::new())) }

    fn validate(&self) -> Result<(), String> {
        match self.get(ID_FIELD).and_then(RecordId::from_json) {
            Some(_) => Ok(()),
            None => Err("row has no usable id".to_string()),
        }
    }
}

/// Accept one network row as a `T`, or say why not.
///
/// Error-shaped objects are rejected before deserialization is attempted, so a
/// record type whose fields are all optional can never absorb an error payload.
pub fn parse_row<T: Record>(value: Value) -> Result<T, RowError> {
    if ErrorBody::is_error_shaped(&value) {
        let body: ErrorBody = serde_json::from_value(value).unwrap_or_default();
        return Err(RowError::ErrorPayload(body.reason()));
    }
    parse_element(value)
}

// Elements of a row array are data; the backend never puts an error object inside one
fn parse_element<T: Record>(value: Value) -> Result<T, RowError> {
    let record: T = serde_json::from_value(value).map_err(|e| RowError::Shape(e.to_string()))?;
    record.validate().map_err(RowError::Invalid)?;
    Ok(record)
}

/// Accept a whole response body as a list of `T`.
///
/// Anything other than an array of valid rows is rejected as a whole; a partially valid
/// result is never returned. An error object arrives as the whole body, so only a
/// non-array body is checked for one; array elements that merely look like an error
/// (a projection of `message` and `code`, say) are rows.
pub fn parse_rows<T: Record>(body: Value) -> Result<Vec<T>, RowError> {
    match body {
        Value::Array(rows) => rows.into_iter().map(parse_element).collect(),
        other if ErrorBody::is_error_shaped(&other) => {
            let body: ErrorBody = serde_json::from_value(other).unwrap_or_default();
            Err(RowError::ErrorPayload(body.reason()))
        }
        other => Err(RowError::Shape(format!("expected an array of rows, got {}", json_type(&other)))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
