//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{FrameworkConfig, KeystoneConfig, LogOutput, LoggingConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &KeystoneConfig) -> ConfigResult<()> {
    validate_framework_config(&config.framework)?;
    validate_logging_config(&config.logging)?;
    validate_bundle_sections(config)?;
    Ok(())
}

fn validate_framework_config(framework: &FrameworkConfig) -> ConfigResult<()> {
    if framework.name.trim().is_empty() {
        return Err(ConfigError::missing_field("framework.name"));
    }

    if framework.name.chars().any(char::is_whitespace) {
        return Err(ConfigError::validation(
            "Framework name cannot contain whitespace",
        ));
    }

    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if let Some(target) = logging.filters.keys().find(|target| target.is_empty()) {
        return Err(ConfigError::validation(format!(
            "Invalid log filter target: {target:?}"
        )));
    }

    Ok(())
}

/// Bundle sections are free-form but must be tables so that
/// `BundleContext::get_config` can deserialize them into structs.
fn validate_bundle_sections(config: &KeystoneConfig) -> ConfigResult<()> {
    for (name, section) in &config.bundles {
        if !section.is_object() {
            return Err(ConfigError::validation(format!(
                "Configuration of bundle '{name}' must be a table"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = KeystoneConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_framework_name() {
        let mut config = KeystoneConfig::default();
        config.framework.name = "  ".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));

        config.framework.name = "my framework".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_validate_file_output_needs_path() {
        let mut config = KeystoneConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some("keystone.log".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_bundle_section_shape() {
        let mut config = KeystoneConfig::default();
        config
            .bundles
            .insert("greeter".to_string(), serde_json::json!("hello"));
        assert!(validate_config(&config).is_err());
    }
}
