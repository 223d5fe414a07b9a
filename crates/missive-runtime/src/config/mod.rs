//! Configuration for the Missive runtime.
//!
//! Layered loading (defaults, files, `MISSIVE_*` environment variables,
//! programmatic overrides) and validation of the mediator, engine, history
//! and logging settings.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    DispatchConfig, HistoryConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    MissiveConfig, SpanEventConfig,
};
pub use validation::validate_config;
