//! Realtime channel frames.
//!
//! Every websocket message is a JSON [`Frame`] addressed to a topic. A client joins
//! `realtime:<schema>:<table>`, waits for the matching reply, and then receives one
//! `postgres_changes` frame per committed row mutation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PHOENIX_TOPIC: &str = "phoenix";

pub mod event {
    pub const JOIN: &str = "phx_join";
    pub const REPLY: &str = "phx_reply";
    pub const LEAVE: &str = "phx_leave";
    pub const CLOSE: &str = "phx_close";
    pub const ERROR: &str = "phx_error";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const POSTGRES_CHANGES: &str = "postgres_changes";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Frame {
    pub fn join(topic: impl Into<String>, payload: &JoinPayload, reference: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            event: event::JOIN.to_string(),
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
            reference: Some(reference.into()),
        }
    }

    pub fn leave(topic: impl Into<String>, reference: impl Into<String>) -> Self {
        Self { topic: topic.into(), event: event::LEAVE.to_string(), payload: Value::Object(Default::default()), reference: Some(reference.into()) }
    }

    pub fn heartbeat(reference: impl Into<String>) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: event::HEARTBEAT.to_string(),
            payload: Value::Object(Default::default()),
            reference: Some(reference.into()),
        }
    }

    pub fn reply(topic: impl Into<String>, reference: Option<String>, reply: &ReplyPayload) -> Self {
        Self { topic: topic.into(), event: event::REPLY.to_string(), payload: serde_json::to_value(reply).unwrap_or(Value::Null), reference }
    }

    pub fn change(topic: impl Into<String>, data: ChangeData) -> Self {
        Self {
            topic: topic.into(),
            event: event::POSTGRES_CHANGES.to_string(),
            payload: serde_json::to_value(ChangePayload { data }).unwrap_or(Value::Null),
            reference: None,
        }
    }

    pub fn close(topic: impl Into<String>) -> Self {
        Self { topic: topic.into(), event: event::CLOSE.to_string(), payload: Value::Object(Default::default()), reference: None }
    }

    pub fn is(&self, event: &str) -> bool { self.event == event }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame({} {} ref={})", self.topic, self.event, self.reference.as_deref().unwrap_or("-"))
    }
}

/// Payload of a join frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPayload {
    pub config: JoinConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JoinConfig {
    #[serde(default)]
    pub postgres_changes: Vec<ChangeFilter>,
}

/// Server-side subscription predicate for one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeFilter {
    /// `*`, `INSERT`, `UPDATE` or `DELETE`
    pub event: String,
    pub schema: String,
    pub table: String,
    /// Server evaluated row filter such as `status=eq.active`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl ChangeFilter {
    /// Whether a committed change passes this filter.
    ///
    /// Supports the `<column>=eq.<value>` and `<column>=neq.<value>` forms. The new row is
    /// tested for inserts and updates, the old row for deletes. An unparseable filter matches nothing.
    pub fn matches(&self, data: &ChangeData) -> bool {
        if data.schema != self.schema || data.table != self.table {
            return false;
        }
        if self.event != "*" && !self.event.eq_ignore_ascii_case(data.change_type.as_str()) {
            return false;
        }
        let Some(filter) = &self.filter else { return true };
        let Some((column, rest)) = filter.split_once('=') else { return false };
        let (negate, expected) = match rest.split_once('.') {
            Some(("eq", v)) => (false, v),
            Some(("neq", v)) => (true, v),
            _ => return false,
        };
        let row = match data.change_type {
            ChangeType::Delete => data.old_record.as_ref(),
            _ => data.record.as_ref(),
        };
        let actual = row.and_then(|r| r.get(column));
        let equal = actual.is_some_and(|v| value_equals_text(v, expected));
        equal != negate
    }
}

/// Compare a JSON column value with its textual rendering in a filter expression
pub fn value_equals_text(value: &Value, text: &str) -> bool {
    match value {
        Value::String(s) => s == text,
        Value::Number(n) => match (n.as_f64(), text.parse::<f64>()) {
            (Some(a), Ok(b)) => a == b,
            _ => n.to_string() == text,
        },
        Value::Bool(b) => b.to_string() == text,
        Value::Null => text == "null",
        other => other.to_string() == text,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub status: String,
    #[serde(default)]
    pub response: Value,
}

impl ReplyPayload {
    pub fn ok() -> Self { Self { status: "ok".to_string(), response: Value::Object(Default::default()) } }

    pub fn error(reason: impl Into<String>) -> Self { Self { status: "error".to_string(), response: serde_json::json!({ "reason": reason.into() }) } }

    pub fn is_ok(&self) -> bool { self.status == "ok" }

    pub fn reason(&self) -> String {
        self.response.get("reason").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| self.response.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Insert => "INSERT",
            ChangeType::Update => "UPDATE",
            ChangeType::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePayload {
    pub data: ChangeData,
}

/// One committed row mutation as delivered on a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeData {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub schema: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_record: Option<Value>,
}
