//! Error types for the Missive core.
//!
//! Three families are kept apart so callers can branch on them:
//!
//! - [`ConfigurationError`]: the pipeline is wired wrong (no handler,
//!   ambiguous handler, unresolvable dependency, call-site compilation failure).
//! - [`ExecutionError`]: handler code failed; the original error is preserved.
//! - [`InvokeError`] / [`CompileError`] / [`EvalError`]: raised by the
//!   invocation engine and folded into one of the two families above by the
//!   executor.

use std::any::type_name;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::BinaryOp;
use crate::foundation::MessageStatus;

/// Boxed error accepted from handler code.
pub type BoxError = Box<dyn StdError + Send + Sync>;

// =============================================================================
// Execution Errors
// =============================================================================

/// A failure raised by handler code.
///
/// Captures the error's type name, its message and its `source()` chain, and
/// keeps the original error object so callers can downcast to it.
#[derive(Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Type name of the original error, absent for chained causes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inner: Option<Box<ExecutionError>>,
    #[serde(skip)]
    original: Option<Arc<dyn StdError + Send + Sync>>,
}

impl ExecutionError {
    /// Captures an error returned by a handler.
    pub fn new<E>(error: E) -> Self
    where
        E: Into<BoxError> + 'static,
    {
        let kind = type_name::<E>();
        let boxed: BoxError = error.into();
        let original: Arc<dyn StdError + Send + Sync> = Arc::from(boxed);
        Self {
            kind: Some(kind.to_string()),
            message: original.to_string(),
            inner: original.source().map(|cause| Box::new(Self::from_cause(cause))),
            original: Some(original),
        }
    }

    /// Records a handler panic.
    pub fn panic(message: impl Into<String>) -> Self {
        Self {
            kind: Some("panic".to_string()),
            message: message.into(),
            inner: None,
            original: None,
        }
    }

    fn from_cause(cause: &(dyn StdError + 'static)) -> Self {
        Self {
            kind: None,
            message: cause.to_string(),
            inner: cause.source().map(|next| Box::new(Self::from_cause(next))),
            original: None,
        }
    }

    /// Type name of the original error (`"panic"` for panics).
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The captured cause of this error, if any.
    pub fn inner(&self) -> Option<&ExecutionError> {
        self.inner.as_deref()
    }

    /// The original error object. Not available after deserialization.
    pub fn original(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.original.as_deref()
    }

    /// Downcasts the original error to a concrete type.
    pub fn downcast_ref<T: StdError + 'static>(&self) -> Option<&T> {
        self.original.as_deref()?.downcast_ref::<T>()
    }

    /// Returns `true` if this records a handler panic.
    pub fn is_panic(&self) -> bool {
        self.kind.as_deref() == Some("panic")
    }
}

impl fmt::Debug for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("inner", &self.inner)
            .finish()
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Some(kind) => write!(f, "{kind}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl StdError for ExecutionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .as_deref()
            .map(|inner| inner as &(dyn StdError + 'static))
    }
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// The pipeline cannot process a message because of how it is wired.
///
/// Stored on a rejected message and returned to the dispatch caller.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigurationError {
    /// No registered method handles the content type.
    #[error("no handler found for `{content_type}`")]
    HandlerNotFound {
        /// Name of the unhandled content type.
        content_type: String,
    },

    /// More than one container handles the content type.
    #[error("ambiguous handler for `{content_type}`: {candidates:?}")]
    AmbiguousHandler {
        /// Name of the content type.
        content_type: String,
        /// `Container::method` of every match, in registration order.
        candidates: Vec<String>,
    },

    /// The resolver could not supply a required type.
    #[error("resolver cannot provide `{type_name}`")]
    Unresolved {
        /// Name of the type that was requested.
        type_name: String,
    },

    /// The call site for a handler method could not be compiled.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// A query's arguments could not be evaluated or converted.
    #[error("invalid arguments for `{method}`: {reason}")]
    InvalidArguments { method: String, reason: String },

    /// Rejection raised by a custom middleware.
    #[error("{0}")]
    Other(String),
}

impl ConfigurationError {
    /// Creates a "handler not found" error.
    pub fn not_found(content_type: impl Into<String>) -> Self {
        Self::HandlerNotFound {
            content_type: content_type.into(),
        }
    }

    /// Creates an "invalid arguments" error.
    pub fn invalid_arguments(method: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidArguments {
            method: method.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an "unresolved dependency" error.
    pub fn unresolved(type_name: impl Into<String>) -> Self {
        Self::Unresolved {
            type_name: type_name.into(),
        }
    }
}

// =============================================================================
// Engine Errors
// =============================================================================

/// A call site could not be compiled for a signature.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileError {
    /// The handler type has no method with this name.
    #[error("method `{method}` is not registered on `{handler}`")]
    UnknownMethod { handler: String, method: String },

    /// The same method was registered twice.
    #[error("method `{method}` is already registered on `{handler}`")]
    DuplicateMethod { handler: String, method: String },

    /// The call supplies a different number of arguments.
    #[error("`{method}` takes {expected} argument(s) but the call supplies {actual}")]
    ArityMismatch {
        method: String,
        expected: usize,
        actual: usize,
    },

    /// A parameter type differs from the method's formal parameter.
    #[error("parameter {position} of `{method}` is `{expected}`, call site uses `{actual}`")]
    ParameterMismatch {
        method: String,
        position: usize,
        expected: String,
        actual: String,
    },

    /// The requested result type differs from the method's return type.
    #[error("`{method}` returns `{expected}`, call site expects `{actual}`")]
    ReturnMismatch {
        method: String,
        expected: String,
        actual: String,
    },

    /// A payload method was invoked as a query method or vice versa.
    #[error("`{method}` cannot be invoked through the {shape} call shape")]
    ShapeMismatch { method: String, shape: String },
}

/// Partial evaluation of a call expression failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// The operator does not apply to these operand types.
    #[error("operator `{op}` cannot combine {lhs} and {rhs}")]
    TypeMismatch {
        op: BinaryOp,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    /// Integer arithmetic overflowed.
    #[error("integer overflow in `{op}`")]
    Overflow { op: BinaryOp },

    /// Floating point arithmetic produced NaN or infinity.
    #[error("`{op}` produced a non-finite number")]
    NonFinite { op: BinaryOp },

    /// A member access targeted a missing field.
    #[error("value has no member `{field}`")]
    MissingMember { field: String },

    /// The expression references a parameter that has no value.
    #[error("parameter {0} is not bound")]
    UnboundParameter(usize),
}

/// Invoking a handler method failed.
#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    /// The handler itself returned an error.
    #[error(transparent)]
    Handler(ExecutionError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Evaluation(#[from] EvalError),

    /// An argument could not be converted to the formal parameter type.
    #[error("argument {position} cannot be converted to `{expected}`: {reason}")]
    Argument {
        position: usize,
        expected: &'static str,
        reason: String,
    },

    /// The supplied handler instance has the wrong type.
    #[error("handler instance is not a `{expected}`")]
    HandlerType { expected: &'static str },

    /// The message payload has the wrong type.
    #[error("payload is not a `{expected}`")]
    PayloadType { expected: &'static str },

    /// The number of supplied arguments is wrong.
    #[error("expected {expected} argument(s), received {actual}")]
    Arity { expected: usize, actual: usize },

    /// The handler result could not be converted to a JSON value.
    #[error("handler result cannot be serialized: {0}")]
    Result(String),
}

impl InvokeError {
    /// Returns `true` if the error came from handler code.
    pub fn is_handler_failure(&self) -> bool {
        matches!(self, Self::Handler(_))
    }

    /// Converts into the error recorded on a failed message.
    ///
    /// Handler failures are returned unwrapped; any other fault is captured as
    /// an execution error of its own.
    pub fn into_execution_error(self) -> ExecutionError {
        match self {
            Self::Handler(error) => error,
            other => ExecutionError::new(other),
        }
    }
}

/// A message status transition that the state machine forbids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("message status cannot change from {from} to {to}")]
pub struct StatusError {
    pub from: MessageStatus,
    pub to: MessageStatus,
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for handler invocation.
pub type InvokeResult<T> = Result<T, InvokeError>;

/// Result type for call-site compilation.
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("row {0} is locked")]
    struct Locked(u32);

    #[derive(Debug, Error)]
    #[error("update failed")]
    struct UpdateFailed(#[source] Locked);

    #[test]
    fn execution_error_keeps_original_and_chain() {
        let error = ExecutionError::new(UpdateFailed(Locked(4)));

        assert!(error.kind().unwrap().ends_with("UpdateFailed"));
        assert_eq!(error.message(), "update failed");
        assert_eq!(error.inner().map(|e| e.message()), Some("row 4 is locked"));
        assert!(error.downcast_ref::<UpdateFailed>().is_some());
        assert!(error.downcast_ref::<Locked>().is_none());
    }

    #[test]
    fn handler_failures_are_not_rewrapped() {
        let captured = ExecutionError::new(Locked(1));
        let unwrapped = InvokeError::Handler(captured).into_execution_error();
        assert!(unwrapped.downcast_ref::<Locked>().is_some());

        let wrapper = InvokeError::Arity {
            expected: 2,
            actual: 1,
        }
        .into_execution_error();
        assert!(wrapper.downcast_ref::<InvokeError>().is_some());
    }

    #[test]
    fn execution_error_round_trips_without_original() {
        let error = ExecutionError::new(UpdateFailed(Locked(9)));
        let json = serde_json::to_string(&error).unwrap();
        let restored: ExecutionError = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.message(), error.message());
        assert_eq!(restored.kind(), error.kind());
        assert!(restored.original().is_none());
    }
}
