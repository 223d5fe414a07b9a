//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use missive_core::EngineOptions;
use missive_framework::{AmbiguityPolicy, DEFAULT_METHOD_PREFIX};
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissiveConfig {
    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Handler discovery and matching.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Invocation engine switches.
    #[serde(default)]
    pub engine: EngineOptions,

    /// In-memory message history.
    #[serde(default)]
    pub history: HistoryConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line format of the log output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// A file under `logging.file_path`.
    File,
}

/// Rotation period of file output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Minutely,
    Hourly,
    Daily,
}

/// Span lifecycle events to log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Log file, required when `output = "file"`.
    pub file_path: Option<PathBuf>,
    pub rotation: LogRotation,
    /// Number of rotated files to keep; unlimited when absent.
    pub max_files: Option<usize>,
    pub thread_ids: bool,
    /// Include file and line of the call site.
    pub file_location: bool,
    pub span_events: SpanEventConfig,
    /// Per-module levels, e.g. `missive_core = "debug"`.
    pub filters: BTreeMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            rotation: LogRotation::Never,
            max_files: None,
            thread_ids: false,
            file_location: false,
            span_events: SpanEventConfig::default(),
            filters: BTreeMap::new(),
        }
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Handler discovery and matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Name prefix of command and event handler methods.
    pub method_prefix: String,

    /// What to do when several containers handle one content type.
    pub ambiguity: AmbiguityPolicy,

    /// Load containers registered with `#[handlers]`.
    pub discover: bool,

    /// Module paths that discovery is restricted to. Empty means all.
    pub modules: Vec<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            method_prefix: DEFAULT_METHOD_PREFIX.to_string(),
            ambiguity: AmbiguityPolicy::default(),
            discover: true,
            modules: Vec::new(),
        }
    }
}

// =============================================================================
// History
// =============================================================================

/// In-memory message history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Append a repository stage to every pipeline.
    pub enabled: bool,

    /// Maximum number of records kept; unbounded when absent.
    pub capacity: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_tables_fill_in_defaults() {
        let config: MissiveConfig = figment::Figment::new()
            .merge(figment::providers::Serialized::defaults(MissiveConfig::default()))
            .merge(figment::providers::Serialized::default("dispatch.ambiguity", "first_match"))
            .merge(figment::providers::Serialized::default("logging.filters.missive_core", "debug"))
            .extract()
            .unwrap();

        assert_eq!(config.dispatch.ambiguity, AmbiguityPolicy::FirstMatch);
        assert_eq!(config.dispatch.method_prefix, "handle");
        assert!(config.dispatch.discover);
        assert_eq!(config.logging.filters["missive_core"], LogLevel::Debug);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(!config.engine.precompile);
    }

    #[test]
    fn levels_map_to_tracing() {
        assert_eq!(LogLevel::Warn.to_tracing_level(), tracing::Level::WARN);
        assert_eq!(LogLevel::Trace.to_string(), "trace");
    }
}
