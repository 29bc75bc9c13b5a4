//! Error types for dependency-managed components.

use keystone_core::ServiceError;
use thiserror::Error;

/// Error type returned by user lifecycle callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors reported by components and the dependency manager.
#[derive(Debug, Clone, Error)]
pub enum ComponentError {
    /// A registry operation failed.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// A lifecycle callback returned an error.
    #[error("component '{component}': {callback} callback failed: {message}")]
    Callback {
        /// Component name.
        component: String,
        /// Which callback failed (`init`, `start`, `stop`, `deinit`).
        callback: &'static str,
        /// The callback's error message.
        message: String,
    },

    /// The operation is not allowed in the component's current state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The state machine did not settle, or bookkeeping is inconsistent.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl ComponentError {
    /// Wraps a failed lifecycle callback.
    pub fn callback(component: impl Into<String>, callback: &'static str, error: &BoxError) -> Self {
        Self::Callback {
            component: component.into(),
            callback,
            message: error.to_string(),
        }
    }

    /// Creates an illegal state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// Creates an invariant violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }
}

/// Result type for component operations.
pub type ComponentResult<T> = Result<T, ComponentError>;
