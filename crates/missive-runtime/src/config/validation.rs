//! Configuration validation.

use super::error::{ConfigError, ConfigResult};
use super::schema::{DispatchConfig, HistoryConfig, LogOutput, LoggingConfig, MissiveConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &MissiveConfig) -> ConfigResult<()> {
    validate_logging(&config.logging)?;
    validate_dispatch(&config.dispatch)?;
    validate_history(&config.history)?;
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    if logging.max_files == Some(0) {
        return Err(ConfigError::validation(
            "logging.max_files must be greater than 0",
        ));
    }
    if let Some(module) = logging.filters.keys().find(|module| module.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "logging.filters has an empty module name: {module:?}"
        )));
    }
    Ok(())
}

fn validate_dispatch(dispatch: &DispatchConfig) -> ConfigResult<()> {
    if dispatch.method_prefix.is_empty() {
        return Err(ConfigError::missing_field("dispatch.method_prefix"));
    }
    if !is_identifier(&dispatch.method_prefix) {
        return Err(ConfigError::validation(format!(
            "dispatch.method_prefix `{}` is not a valid identifier",
            dispatch.method_prefix
        )));
    }
    for module in &dispatch.modules {
        if !is_module_path(module) {
            return Err(ConfigError::InvalidModulePath(module.clone()));
        }
    }
    Ok(())
}

fn validate_history(history: &HistoryConfig) -> ConfigResult<()> {
    if history.enabled && history.capacity == Some(0) {
        return Err(ConfigError::validation(
            "history.capacity must be greater than 0 when history is enabled",
        ));
    }
    Ok(())
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    chars
        .next()
        .is_some_and(|first| first == '_' || first.is_alphabetic())
        && chars.all(|c| c == '_' || c.is_alphanumeric())
}

/// `crate_name::module::sub`, no leading or trailing separators.
fn is_module_path(path: &str) -> bool {
    path.split("::").all(is_identifier)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        validate_config(&MissiveConfig::default()).unwrap();
    }

    #[rstest]
    #[case("my_app", true)]
    #[case("my_app::orders::v2", true)]
    #[case("_private::x", true)]
    #[case("", false)]
    #[case("my_app::", false)]
    #[case("::my_app", false)]
    #[case("my-app", false)]
    #[case("my_app:::orders", false)]
    #[case("2fast", false)]
    fn module_paths(#[case] path: &str, #[case] valid: bool) {
        assert_eq!(is_module_path(path), valid);
    }

    #[test]
    fn invalid_scope_is_reported() {
        let mut config = MissiveConfig::default();
        config.dispatch.modules = vec!["my_app".into(), "my app".into()];
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidModulePath(path) if path == "my app"));
    }

    #[rstest]
    #[case("", "dispatch.method_prefix")]
    #[case("on-", "not a valid identifier")]
    fn method_prefix(#[case] prefix: &str, #[case] expected: &str) {
        let mut config = MissiveConfig::default();
        config.dispatch.method_prefix = prefix.to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains(expected), "{err}");
    }

    #[test]
    fn file_output_needs_a_path() {
        let mut config = MissiveConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { field }) if field == "logging.file_path"
        ));

        config.logging.file_path = Some(PathBuf::from("logs/missive.log"));
        validate_config(&config).unwrap();
    }

    #[test]
    fn zero_history_capacity_only_matters_when_enabled() {
        let mut config = MissiveConfig::default();
        config.history.capacity = Some(0);
        validate_config(&config).unwrap();

        config.history.enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
