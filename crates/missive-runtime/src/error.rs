//! Runtime error types.

use missive_framework::BuildError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised while assembling a runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Loading or validating the configuration failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The mediator could not be built.
    #[error("Failed to build mediator: {0}")]
    Build(#[from] BuildError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
