//! Domain error types.

use thiserror::Error;

/// Top-level domain error type.
///
/// Returned by domain event handlers, command and query handlers, and by the
/// dispatchers that invoke them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// An entity could not be found.
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// A handler failed while reacting to a domain event.
    #[error("handler error: {0}")]
    Handler(String),

    /// The operation observed a cancellation request.
    #[error("operation cancelled")]
    Cancelled,

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns `true` if this error is the cancellation outcome.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
