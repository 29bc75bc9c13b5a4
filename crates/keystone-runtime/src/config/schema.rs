//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
///
/// ```toml
/// [framework]
/// name = "keystone"
/// auto_start = true
///
/// [logging]
/// level = "debug"
/// format = "pretty"
///
/// [bundles.greeter]
/// greeting = "Hello"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeystoneConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Framework settings.
    #[serde(default)]
    pub framework: FrameworkConfig,

    /// Per-bundle configuration sections, keyed by bundle name.
    #[serde(default)]
    pub bundles: HashMap<String, serde_json::Value>,
}

impl KeystoneConfig {
    /// Returns the configuration section of the named bundle, or an empty
    /// object when the section is absent.
    pub fn bundle_section(&self, name: &str) -> serde_json::Value {
        self.bundles
            .get(name)
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()))
    }
}

// =============================================================================
// Framework
// =============================================================================

/// Framework settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// Framework instance name, used in logs.
    #[serde(default = "default_framework_name")]
    pub name: String,

    /// Start every installed bundle when the framework runs.
    #[serde(default = "default_true")]
    pub auto_start: bool,

    /// Warn about registrations and references a bundle still holds when it
    /// stops.
    #[serde(default = "default_true")]
    pub warn_on_leaks: bool,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            name: default_framework_name(),
            auto_start: true,
            warn_on_leaks: true,
        }
    }
}

fn default_framework_name() -> String {
    "keystone".to_string()
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
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
    pub fn as_str(&self) -> &'static str {
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

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature.
    #[cfg(feature = "json-log")]
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Writes to [`LoggingConfig::file_path`].
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level, overridden by `RUST_LOG` when set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread ids in each line.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line in each line.
    #[serde(default)]
    pub file_location: bool,

    /// Log file for [`LogOutput::File`].
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Per-target levels, e.g. `keystone_dm = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            file_path: None,
            filters: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config: KeystoneConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.framework.name, "keystone");
        assert!(config.framework.auto_start);
        assert!(config.framework.warn_on_leaks);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.bundles.is_empty());
    }

    #[test]
    fn test_bundle_section_defaults_to_empty_object() {
        let config: KeystoneConfig = serde_json::from_value(serde_json::json!({
            "bundles": { "greeter": { "greeting": "hi" } }
        }))
        .unwrap();

        assert_eq!(config.bundle_section("greeter")["greeting"], "hi");
        assert_eq!(config.bundle_section("missing"), serde_json::json!({}));
    }

    #[test]
    fn test_log_level_names() {
        let level: LogLevel = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(level, LogLevel::Warn);
        assert_eq!(level.to_string(), "warn");
        assert_eq!(level.to_tracing_level(), tracing::Level::WARN);
    }
}
