use serde::{Deserialize, Serialize};

/// Error object returned by the backend in place of data.
///
/// The REST endpoint sends `{message, code, details, hint}`. The auth endpoint
/// uses `{error, error_description}` or `{msg, code}` depending on the failure,
/// so every field is optional and [`ErrorBody::reason`] picks the best one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "code_as_string")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

/// Keys that may appear in an error object and nowhere else
pub const ERROR_KEYS: &[&str] = &["message", "msg", "code", "details", "hint", "error", "error_description", "status"];

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self { Self { message: Some(message.into()), ..Default::default() } }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Human readable reason, preferring the most specific field present
    pub fn reason(&self) -> String {
        self.error_description
            .as_ref()
            .or(self.message.as_ref())
            .or(self.msg.as_ref())
            .or(self.error.as_ref())
            .cloned()
            .unwrap_or_else(|| "unknown error".to_string())
    }

    /// Does this JSON value have the structure of an error object rather than a row?
    ///
    /// True when every key is an error key and at least one message-bearing key holds a string.
    pub fn is_error_shaped(value: &serde_json::Value) -> bool {
        let Some(map) = value.as_object() else { return false };
        if map.is_empty() || !map.keys().all(|k| ERROR_KEYS.contains(&k.as_str())) {
            return false;
        }
        ["message", "msg", "error_description", "error"].iter().any(|k| map.get(*k).is_some_and(|v| v.is_string()))
    }
}

impl std::fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.reason(), code),
            None => write!(f, "{}", self.reason()),
        }
    }
}

// The auth endpoint sends numeric codes, the REST endpoint sends SQLSTATE strings
fn code_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where D: serde::Deserializer<'de> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
