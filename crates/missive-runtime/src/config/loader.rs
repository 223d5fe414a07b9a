//! Layered configuration loading with figment.
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: `missive.toml`
//! - `yaml-config`: `missive.yaml`, `missive.yml`
//!
//! # Priority (lowest to highest)
//!
//! 1. Built-in defaults, then any base passed to [`ConfigLoader::merge`]
//! 2. Profile file (`missive.{profile}.toml`)
//! 3. Main file (`missive.toml`)
//! 4. Environment variables (`MISSIVE_*`)
//! 5. Values passed to [`ConfigLoader::set`]
//!
//! # Environment Variables
//!
//! `MISSIVE_` prefix, `__` between nesting levels:
//!
//! - `MISSIVE_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `MISSIVE_DISPATCH__AMBIGUITY=first_match` → `dispatch.ambiguity = "first_match"`
//! - `MISSIVE_HISTORY__CAPACITY=500` → `history.capacity = 500`
//!
//! `MISSIVE_PROFILE` selects the profile.
//!
//! ```rust,ignore
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .search_path("./config")
//!     .set("engine.precompile", true)
//!     .load()?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "toml-config", feature = "yaml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::MissiveConfig;

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "MISSIVE_";

/// Base name of configuration files.
const FILE_STEM: &str = "missive";

/// Environment-specific configuration layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name; `dev` and `prod` are accepted as aliases.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `MISSIVE_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(format!("{ENV_PREFIX}PROFILE"))
            .map(|name| Self::parse(&name))
            .unwrap_or_default()
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-source configuration loader.
pub struct ConfigLoader {
    base: Figment,
    overrides: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            base: Figment::new(),
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a directory searched for configuration files.
    ///
    /// Without explicit paths, the current directory and the user
    /// configuration directory (`~/.config/missive` on Linux) are searched.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.search_path(dir.join(FILE_STEM)),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Replaces the built-in defaults with `config`. Files and environment
    /// variables still apply on top.
    pub fn merge(mut self, config: MissiveConfig) -> Self {
        self.base = self.base.merge(Serialized::defaults(config));
        self
    }

    /// Overrides one dotted key after every other source.
    pub fn set<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    /// Merges every source and extracts the configuration.
    pub fn load(self) -> ConfigResult<MissiveConfig> {
        let profile = self.profile.clone();
        let config: MissiveConfig = self.figment()?.extract()?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            history = config.history.enabled,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Builds the merged figment without extracting it.
    pub fn figment(self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(MissiveConfig::default()))
            .merge(self.base.clone());

        match &self.config_file {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Loading configuration file");
                figment = merge_file(figment, path)?;
            }
            Some(path) => return Err(ConfigError::FileNotFound(path.clone())),
            None => figment = self.search_files(figment),
        }

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Loading environment variables");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        Ok(figment.merge(self.overrides))
    }

    fn resolved_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join(FILE_STEM)))
            .collect()
    }

    /// Merges the profile file and the main file of the first search path
    /// holding a main file in one of `extensions`.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn search_format<F>(
        &self,
        mut figment: Figment,
        search_paths: &[PathBuf],
        extensions: &[&str],
        merge: F,
    ) -> (Figment, bool)
    where
        F: Fn(Figment, &Path) -> Figment,
    {
        for dir in search_paths {
            for ext in extensions {
                let profile_path = dir.join(format!("{FILE_STEM}.{}.{ext}", self.profile));
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "Loading profile configuration");
                    figment = merge(figment, &profile_path);
                }

                let main_path = dir.join(format!("{FILE_STEM}.{ext}"));
                if main_path.exists() {
                    info!(path = %main_path.display(), "Loading configuration file");
                    return (merge(figment, &main_path), true);
                }
            }
        }
        (figment, false)
    }

    #[cfg_attr(
        not(any(feature = "toml-config", feature = "yaml-config")),
        allow(unused_mut)
    )]
    fn search_files(&self, mut figment: Figment) -> Figment {
        let search_paths = self.resolved_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (merged, hit) =
                self.search_format(figment, &search_paths, &["toml"], |f, path| {
                    f.merge(Toml::file(path))
                });
            figment = merged;
            found |= hit;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (merged, hit) =
                self.search_format(figment, &search_paths, &["yaml", "yml"], |f, path| {
                    f.merge(Yaml::file(path))
                });
            figment = merged;
            found |= hit;
        }

        if !found {
            warn!("No configuration file found, using defaults");
        }
        figment
    }
}

fn merge_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    let ext = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    match ext {
        #[cfg(feature = "toml-config")]
        "toml" => Ok(figment.merge(Toml::file(path))),
        #[cfg(feature = "yaml-config")]
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<MissiveConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from one file plus environment variables.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<MissiveConfig> {
    ConfigLoader::new().file(path).load()
}

#[cfg(test)]
mod tests {
    use figment::Jail;
    use missive_framework::AmbiguityPolicy;

    use super::*;
    use crate::config::LogLevel;

    fn load(loader: ConfigLoader) -> Result<MissiveConfig, figment::Error> {
        loader.load().map_err(|error| error.to_string().into())
    }

    #[test]
    fn defaults_without_sources() {
        Jail::expect_with(|jail| {
            let config = load(ConfigLoader::new().search_path(jail.directory()).without_env())?;
            assert_eq!(config, MissiveConfig::default());
            Ok(())
        });
    }

    #[test]
    fn file_then_env_then_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "missive.toml",
                r#"
                [dispatch]
                method_prefix = "on"
                ambiguity = "first_match"

                [history]
                enabled = true
                capacity = 10
                "#,
            )?;
            jail.set_env("MISSIVE_HISTORY__CAPACITY", "50");
            jail.set_env("MISSIVE_LOGGING__LEVEL", "debug");

            let config = load(
                ConfigLoader::new()
                    .search_path(jail.directory())
                    .set("logging.level", "warn"),
            )?;

            assert_eq!(config.dispatch.method_prefix, "on");
            assert_eq!(config.dispatch.ambiguity, AmbiguityPolicy::FirstMatch);
            assert!(config.history.enabled);
            assert_eq!(config.history.capacity, Some(50));
            assert_eq!(config.logging.level, LogLevel::Warn);
            Ok(())
        });
    }

    #[test]
    fn profile_file_is_layered_under_main_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "missive.production.toml",
                "[engine]\nprecompile = true\n[dispatch]\nmethod_prefix = \"prod\"\n",
            )?;
            jail.create_file("missive.toml", "[dispatch]\nmethod_prefix = \"main\"\n")?;

            let config = load(
                ConfigLoader::new()
                    .profile("prod")
                    .search_path(jail.directory())
                    .without_env(),
            )?;

            assert!(config.engine.precompile);
            assert_eq!(config.dispatch.method_prefix, "main");
            Ok(())
        });
    }

    #[test]
    fn explicit_file_must_exist() {
        let err = ConfigLoader::new()
            .file("/nonexistent/missive.toml")
            .without_env()
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn malformed_values_are_parse_errors() {
        Jail::expect_with(|jail| {
            jail.create_file("missive.toml", "[logging]\nlevel = \"loud\"\n")?;
            let err = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .unwrap_err();
            assert!(matches!(err, ConfigError::ParseError(_)));
            Ok(())
        });
    }

    #[test]
    fn profile_names_and_aliases() {
        assert_eq!(Profile::parse("PROD"), Profile::Production);
        assert_eq!(Profile::parse("dev"), Profile::Development);
        assert_eq!(Profile::parse("staging").to_string(), "staging");

        Jail::expect_with(|jail| {
            jail.set_env("MISSIVE_PROFILE", "production");
            assert_eq!(Profile::from_env(), Profile::Production);
            Ok(())
        });
    }
}
