//! The message envelope shared by commands, queries and events.
//!
//! A [`Message`] wraps one payload together with its execution state. It is
//! created right before entering a pipeline, mutated in place by the stages,
//! and reaches exactly one terminal status:
//!
//! ```text
//!             ┌──▶ Rejected   (configuration error, handler never runs)
//! Created ────┼──▶ Completed  (handler returned normally)
//!             └──▶ Failed     (handler returned an error or panicked)
//! ```
//!
//! `error` is present iff the status is `Failed`, `rejection` iff it is
//! `Rejected`, and the execution duration is only recorded when the executor
//! actually ran the handler.

use std::any::{Any, type_name};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::extensions::Extensions;
use super::types::TypeKey;
use crate::engine::CallExpr;
use crate::error::{ConfigurationError, ExecutionError, StatusError};

// =============================================================================
// Kind & Status
// =============================================================================

/// The kind of a message, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Changes state; returns the (possibly mutated) payload.
    Command,
    /// Reads state; returns a value.
    Query,
    /// Notifies every subscribed handler.
    Event,
}

impl MessageKind {
    /// All kinds, in pipeline-container order.
    pub const ALL: [Self; 3] = [Self::Command, Self::Query, Self::Event];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Query => "query",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Created,
    Rejected,
    Completed,
    Failed,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Created)
    }

    /// Returns `true` if the state machine allows moving to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        self == Self::Created && next.is_terminal()
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Content
// =============================================================================

/// A value that can travel as a message payload.
///
/// Payloads must be serializable so persistence can snapshot them.
pub trait Content: Any + Send + Serialize {}

impl<T: Any + Send + Serialize> Content for T {}

type SnapshotFn = fn(&(dyn Any + Send)) -> Option<Value>;

fn snapshot_of<C: Content>(content: &(dyn Any + Send)) -> Option<Value> {
    content
        .downcast_ref::<C>()
        .and_then(|content| serde_json::to_value(content).ok())
}

// =============================================================================
// Message
// =============================================================================

/// The execution envelope for one command, query or event.
pub struct Message {
    id: Uuid,
    kind: MessageKind,
    content: Box<dyn Any + Send>,
    content_type: TypeKey,
    content_type_name: String,
    status: MessageStatus,
    error: Option<ExecutionError>,
    rejection: Option<ConfigurationError>,
    execution_duration: Option<Duration>,
    created_at: DateTime<Utc>,
    result: Option<Value>,
    data: BTreeMap<String, String>,
    extensions: Extensions,
    snapshot: SnapshotFn,
}

impl Message {
    /// Wraps a payload into a new message of the given kind.
    pub fn new<C: Content>(kind: MessageKind, content: C) -> Self {
        Self::with_type_name(kind, content, type_name::<C>().to_string())
    }

    /// Creates a command message.
    pub fn command<C: Content>(content: C) -> Self {
        Self::new(MessageKind::Command, content)
    }

    /// Creates an event message.
    pub fn event<C: Content>(content: C) -> Self {
        Self::new(MessageKind::Event, content)
    }

    /// Creates a query message from a call expression.
    ///
    /// The content type name is `Handler::method`.
    pub fn query(call: CallExpr) -> Self {
        let name = format!("{}::{}", call.handler().name(), call.method());
        Self::with_type_name(MessageKind::Query, call, name)
    }

    fn with_type_name<C: Content>(kind: MessageKind, content: C, content_type_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            content: Box::new(content),
            content_type: TypeKey::of::<C>(),
            content_type_name,
            status: MessageStatus::Created,
            error: None,
            rejection: None,
            execution_duration: None,
            created_at: Utc::now(),
            result: None,
            data: BTreeMap::new(),
            extensions: Extensions::new(),
            snapshot: snapshot_of::<C>,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Runtime type of the payload.
    pub fn content_type(&self) -> TypeKey {
        self.content_type
    }

    /// Fully-qualified payload type name (`Handler::method` for queries).
    pub fn content_type_name(&self) -> &str {
        &self.content_type_name
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    /// The handler failure; present iff the status is `Failed`.
    pub fn error(&self) -> Option<&ExecutionError> {
        self.error.as_ref()
    }

    /// Why the message was rejected; present iff the status is `Rejected`.
    pub fn rejection(&self) -> Option<&ConfigurationError> {
        self.rejection.as_ref()
    }

    pub fn execution_duration(&self) -> Option<Duration> {
        self.execution_duration
    }

    /// Execution duration in whole milliseconds.
    pub fn execution_duration_ms(&self) -> Option<u64> {
        self.execution_duration
            .map(|duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Value produced by a query handler.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn set_result(&mut self, value: Value) {
        self.result = Some(value);
    }

    pub fn take_result(&mut self) -> Option<Value> {
        self.result.take()
    }

    /// Free-form annotations, persisted with the message.
    pub fn data(&self) -> &BTreeMap<String, String> {
        &self.data
    }

    pub fn set_data(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), value.into());
    }

    /// Per-dispatch scratch storage for pipeline stages.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Returns the payload if it is a `C`.
    pub fn content<C: Any>(&self) -> Option<&C> {
        self.content.downcast_ref::<C>()
    }

    pub fn content_mut<C: Any>(&mut self) -> Option<&mut C> {
        self.content.downcast_mut::<C>()
    }

    /// The payload as a type-erased reference.
    pub fn content_any(&self) -> &(dyn Any + Send) {
        &*self.content
    }

    pub fn content_any_mut(&mut self) -> &mut (dyn Any + Send) {
        &mut *self.content
    }

    /// Consumes the message and returns the payload, or the message back if
    /// the payload is not a `C`.
    pub fn into_content<C: Any>(mut self) -> Result<C, Self> {
        match self.content.downcast::<C>() {
            Ok(content) => Ok(*content),
            Err(content) => {
                self.content = content;
                Err(self)
            }
        }
    }

    /// Serializes the payload to JSON.
    pub fn content_snapshot(&self) -> Option<Value> {
        (self.snapshot)(&*self.content)
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// Marks the message as rejected.
    pub fn reject(&mut self, reason: ConfigurationError) -> Result<(), StatusError> {
        self.transition(MessageStatus::Rejected)?;
        self.rejection = Some(reason);
        Ok(())
    }

    /// Marks the message as completed after running for `duration`.
    pub fn complete(&mut self, duration: Duration) -> Result<(), StatusError> {
        self.transition(MessageStatus::Completed)?;
        self.execution_duration = Some(duration);
        Ok(())
    }

    /// Marks the message as failed after running for `duration`.
    pub fn fail(&mut self, error: ExecutionError, duration: Duration) -> Result<(), StatusError> {
        self.transition(MessageStatus::Failed)?;
        self.error = Some(error);
        self.execution_duration = Some(duration);
        Ok(())
    }

    fn transition(&mut self, next: MessageStatus) -> Result<(), StatusError> {
        if !self.status.can_transition_to(next) {
            return Err(StatusError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("content_type", &self.content_type_name)
            .field("status", &self.status)
            .field("error", &self.error)
            .field("rejection", &self.rejection)
            .field("execution_duration", &self.execution_duration)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Serialize, PartialEq)]
    struct Rename {
        id: u32,
        name: String,
    }

    fn rename() -> Rename {
        Rename {
            id: 3,
            name: "ada".into(),
        }
    }

    #[test]
    fn new_message_starts_created() {
        let message = Message::command(rename());

        assert_eq!(message.kind(), MessageKind::Command);
        assert_eq!(message.status(), MessageStatus::Created);
        assert!(message.content_type_name().ends_with("Rename"));
        assert!(message.error().is_none());
        assert!(message.execution_duration().is_none());
        assert_eq!(message.content::<Rename>(), Some(&rename()));
    }

    #[test]
    fn terminal_statuses_are_final() {
        let mut message = Message::command(rename());
        message.complete(Duration::from_millis(12)).unwrap();

        let err = message
            .reject(ConfigurationError::not_found("x"))
            .unwrap_err();
        assert_eq!(err.from, MessageStatus::Completed);
        assert_eq!(err.to, MessageStatus::Rejected);
        assert_eq!(message.execution_duration_ms(), Some(12));
        assert!(message.rejection().is_none());
    }

    #[test]
    fn failure_records_error_and_duration() {
        let mut message = Message::event(rename());
        let error = ExecutionError::panic("boom");
        message.fail(error, Duration::from_millis(3)).unwrap();

        assert_eq!(message.status(), MessageStatus::Failed);
        assert!(message.error().is_some_and(ExecutionError::is_panic));
        assert_eq!(message.execution_duration_ms(), Some(3));
    }

    #[test]
    fn rejection_records_no_duration() {
        let mut message = Message::command(rename());
        message
            .reject(ConfigurationError::not_found("Rename"))
            .unwrap();

        assert_eq!(message.status(), MessageStatus::Rejected);
        assert!(message.error().is_none());
        assert!(message.execution_duration().is_none());
    }

    #[test]
    fn created_cannot_transition_to_created() {
        assert!(!MessageStatus::Created.can_transition_to(MessageStatus::Created));
        assert!(MessageStatus::Created.can_transition_to(MessageStatus::Failed));
        assert!(!MessageStatus::Failed.can_transition_to(MessageStatus::Completed));
    }

    #[test]
    fn content_round_trips_through_the_envelope() {
        let message = Message::command(rename());
        assert_eq!(
            message.content_snapshot(),
            Some(json!({"id": 3, "name": "ada"}))
        );

        let message = message.into_content::<String>().unwrap_err();
        assert_eq!(message.into_content::<Rename>().unwrap(), rename());
    }
}
