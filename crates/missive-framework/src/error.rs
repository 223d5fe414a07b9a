//! Error types for the Missive framework.

use missive_core::{BoxError, ConfigurationError, ExecutionError, MessageKind, StatusError};
use thiserror::Error;

// =============================================================================
// Locator Errors
// =============================================================================

/// A content type could not be bound to a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocateError {
    /// No container method accepts the content type.
    #[error("no handler found for `{content_type}`")]
    NotFound {
        /// Name of the content type.
        content_type: String,
    },

    /// Several container methods accept the content type.
    #[error("ambiguous handler for `{content_type}`: {candidates:?}")]
    Ambiguous {
        /// Name of the content type.
        content_type: String,
        /// `Container::method` of every match.
        candidates: Vec<String>,
    },
}

impl From<LocateError> for ConfigurationError {
    fn from(error: LocateError) -> Self {
        match error {
            LocateError::NotFound { content_type } => Self::HandlerNotFound { content_type },
            LocateError::Ambiguous {
                content_type,
                candidates,
            } => Self::AmbiguousHandler {
                content_type,
                candidates,
            },
        }
    }
}

/// Result type for handler lookups.
pub type LocateResult<T> = Result<T, LocateError>;

// =============================================================================
// Repository Errors
// =============================================================================

/// A persistence collaborator failed.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The message could not be converted for storage.
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage backend reported an error.
    #[error("repository backend error: {0}")]
    Backend(BoxError),
}

impl RepositoryError {
    /// Wraps a backend-specific error.
    pub fn backend(error: impl Into<BoxError>) -> Self {
        Self::Backend(error.into())
    }
}

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// A filter pattern is not a valid regular expression.
#[derive(Debug, Clone, Error)]
#[error("invalid {field} pattern `{pattern}`: {source}")]
pub struct FilterError {
    /// The filter field the pattern was meant for.
    pub field: &'static str,
    /// The rejected pattern.
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// Result type for filter construction.
pub type FilterResult<T> = Result<T, FilterError>;

// =============================================================================
// Pipeline Errors
// =============================================================================

/// A pipeline could not be built or could not run to completion.
///
/// Stage outcomes that only change the message status are not pipeline
/// errors; these abort the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage with the same id is already present.
    #[error("stage `{0}` is already registered")]
    DuplicateStage(String),

    /// No stage has the given id.
    #[error("stage `{0}` not found")]
    StageNotFound(String),

    /// The message was submitted to the pipeline of another kind.
    #[error("{actual} message submitted to the {expected} pipeline")]
    KindMismatch {
        expected: MessageKind,
        actual: MessageKind,
    },

    /// A stage tried a forbidden status transition.
    #[error(transparent)]
    Status(#[from] StatusError),

    /// The repository stage failed to persist the message.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// A custom stage failed.
    #[error("stage `{stage}` failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: BoxError,
    },
}

impl PipelineError {
    /// Creates an error for a failing custom stage.
    pub fn stage(stage: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: source.into(),
        }
    }
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

// =============================================================================
// Mediator Errors
// =============================================================================

/// The mediator could not be assembled.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A query method could not be registered with the engine.
    #[error(transparent)]
    Compile(#[from] missive_core::CompileError),

    /// A standard or custom stage could not be added.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The method prefix is empty.
    #[error("handler method prefix must not be empty")]
    EmptyPrefix,
}

/// Result type for building a mediator.
pub type BuildResult<T> = Result<T, BuildError>;

/// Outcome of a failed dispatch, as seen by the caller.
///
/// The three variants stay distinguishable: the handler failed, the pipeline
/// is wired wrongly for this message, or a stage aborted the run.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The handler failed; the original error is preserved.
    #[error(transparent)]
    Execution(ExecutionError),

    /// The message was rejected before the handler ran.
    #[error(transparent)]
    Configuration(ConfigurationError),

    /// A stage aborted the pipeline.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The query result could not be converted to the requested type.
    #[error("query result cannot be converted: {0}")]
    Conversion(#[from] serde_json::Error),
}

impl DispatchError {
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// The handler error, if the handler failed.
    pub fn execution_error(&self) -> Option<&ExecutionError> {
        match self {
            Self::Execution(error) => Some(error),
            _ => None,
        }
    }

    /// The rejection reason, if the message was rejected.
    pub fn configuration_error(&self) -> Option<&ConfigurationError> {
        match self {
            Self::Configuration(error) => Some(error),
            _ => None,
        }
    }
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
