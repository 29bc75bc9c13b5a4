//! Configuration for the Keystone runtime.
//!
//! Settings are layered with figment: built-in defaults, an optional profile
//! file, `keystone.toml` / `keystone.yaml`, then `KEYSTONE_*` environment
//! variables. Each bundle reads its own section under `bundles.<name>`.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    FrameworkConfig, KeystoneConfig, LogFormat, LogLevel, LogOutput, LoggingConfig,
    SpanEventConfig,
};
pub use validation::validate_config;
