//! Runtime error types.

use keystone_core::{BundleId, ServiceError};
use keystone_dm::ComponentError;
use thiserror::Error;

pub use crate::config::{ConfigError, ConfigResult};

/// Errors that can occur while managing the framework and its bundles.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Component(#[from] ComponentError),

    /// No installed bundle has this id.
    #[error("Bundle not found: {0}")]
    BundleNotFound(BundleId),

    /// A bundle with the same name is already installed.
    #[error("Bundle already installed: {0}")]
    BundleExists(String),

    /// The bundle's activator failed to start.
    #[error("Failed to start bundle '{name}': {message}")]
    BundleStart { name: String, message: String },

    /// The bundle's activator failed to stop. The bundle is still torn down.
    #[error("Failed to stop bundle '{name}': {message}")]
    BundleStop { name: String, message: String },

    /// The operation is not allowed in the bundle's current state.
    #[error("Bundle '{name}' is {state}, cannot {operation}")]
    BundleState {
        name: String,
        state: &'static str,
        operation: &'static str,
    },

    /// The descriptor was built against an incompatible bundle API.
    #[error("Bundle '{name}' targets API {found}, host provides {host}")]
    IncompatibleBundle {
        name: String,
        found: String,
        host: String,
    },

    /// Installing or listening for shutdown signals failed.
    #[error("Signal handling failed: {0}")]
    Signal(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
