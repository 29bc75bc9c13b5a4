//! Error types for the service registry.

use thiserror::Error;

/// Errors reported by registry, reference and tracker operations.
///
/// Misuse of the registry never panics; it is logged at the call site and
/// surfaced as one of these variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// A parameter was malformed or belongs to another bundle.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// An allocation failed; nothing was left partially registered.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// The operation is not valid for the object's current state, e.g. using
    /// a registration that was already unregistered.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Internal bookkeeping is inconsistent (missing table entry, unreachable
    /// state).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl ServiceError {
    /// Creates an illegal argument error.
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::IllegalArgument(message.into())
    }

    /// Creates an out of memory error.
    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::OutOfMemory(message.into())
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

/// Result type for service registry operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
