//! # Missive Runtime
//!
//! Configuration-driven setup of a [`Mediator`](missive_framework::Mediator).
//!
//! This crate provides:
//! - Layered configuration (`missive.toml`, `MISSIVE_*` variables, code)
//! - Validation of the loaded configuration
//! - Logging setup on `tracing-subscriber`, with optional rolling files
//! - [`MissiveRuntime`], a mediator wired from the configuration
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log lines
//!
//! ```rust,ignore
//! use missive_runtime::MissiveRuntime;
//!
//! let runtime = MissiveRuntime::builder()
//!     .resolver(services)
//!     .build()?;
//! let receipt = runtime.mediator().handle_command(PlaceOrder::new("A-1"))?;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, MissiveConfig, load_config};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{MissiveRuntime, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros and span helpers.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
