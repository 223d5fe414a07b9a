use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use missive_core::{ConfigurationError, ExecutionError, Message, MessageKind, MessageStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A serializable snapshot of a message.
///
/// Carries every message field except the per-dispatch extensions; the
/// payload is stored as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub kind: MessageKind,
    pub content_type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<ConfigurationError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl MessageRecord {
    pub fn from_message(message: &Message) -> Self {
        Self {
            id: message.id(),
            kind: message.kind(),
            content_type_name: message.content_type_name().to_string(),
            content: message.content_snapshot(),
            status: message.status(),
            error: message.error().cloned(),
            rejection: message.rejection().cloned(),
            execution_duration_ms: message.execution_duration_ms(),
            created_at: message.created_at(),
            result: message.result().cloned(),
            data: message.data().clone(),
        }
    }
}

impl From<&Message> for MessageRecord {
    fn from(message: &Message) -> Self {
        Self::from_message(message)
    }
}

/// Read access to the fields a filter inspects.
pub trait MessageView {
    fn kind(&self) -> MessageKind;
    fn status(&self) -> MessageStatus;
    fn content_type_name(&self) -> &str;
    fn execution_duration_ms(&self) -> Option<u64>;
    fn created_at(&self) -> DateTime<Utc>;
    /// Type name of the recorded handler error, if any.
    fn error_kind(&self) -> Option<&str>;
}

impl MessageView for Message {
    fn kind(&self) -> MessageKind {
        Message::kind(self)
    }

    fn status(&self) -> MessageStatus {
        Message::status(self)
    }

    fn content_type_name(&self) -> &str {
        Message::content_type_name(self)
    }

    fn execution_duration_ms(&self) -> Option<u64> {
        Message::execution_duration_ms(self)
    }

    fn created_at(&self) -> DateTime<Utc> {
        Message::created_at(self)
    }

    fn error_kind(&self) -> Option<&str> {
        self.error().and_then(ExecutionError::kind)
    }
}

impl MessageView for MessageRecord {
    fn kind(&self) -> MessageKind {
        self.kind
    }

    fn status(&self) -> MessageStatus {
        self.status
    }

    fn content_type_name(&self) -> &str {
        &self.content_type_name
    }

    fn execution_duration_ms(&self) -> Option<u64> {
        self.execution_duration_ms
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn error_kind(&self) -> Option<&str> {
        self.error.as_ref().and_then(ExecutionError::kind)
    }
}
