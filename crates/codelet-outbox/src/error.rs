//! Outbox error types.

use codelet_core::error::DomainError;
use thiserror::Error;

/// Failure reported by a storage session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The transaction could not be committed; nothing was written.
    #[error("commit failed: {0}")]
    Commit(String),

    /// The session was opened read-only.
    #[error("commit rejected: the session is read-only")]
    ReadOnly,

    /// A read query failed.
    #[error("query failed: {0}")]
    Query(String),

    /// An entity could not be converted to or from its stored form.
    #[error("entity serialization failed: {0}")]
    Serialization(String),
}

/// Failure while transferring, deserializing or dispatching domain events.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// Event arguments could not be serialized. The enclosing commit aborts.
    #[error("domain event serialization failed: {0}")]
    Serialization(String),

    /// A stored envelope could not be turned back into a dispatcher.
    #[error("domain event deserialization failed: {0}")]
    Deserialization(String),

    /// No dispatcher was registered for the envelope's type tag.
    #[error("no dispatcher registered for domain event type {0}")]
    UnknownEventType(String),

    /// An entity tried to transfer events before it had an identifier.
    #[error("entity {entity} has no identifier; its domain events cannot be transferred")]
    MissingEntityId {
        /// The entity type name.
        entity: &'static str,
    },

    /// The storage session failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A handler or the model resolver failed.
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DomainError),

    /// The operation observed a cancellation request.
    #[error("operation cancelled")]
    Cancelled,
}

impl OutboxError {
    /// Returns `true` for the cancellation outcome, which is never routed to
    /// an exception handler.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Dispatch(error) => error.is_cancellation(),
            _ => false,
        }
    }
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The poll interval is not a whole number of milliseconds.
    #[error("invalid poll interval {0:?}: expected a positive number of milliseconds")]
    InvalidPollInterval(String),

    /// The commit mode is not recognised.
    #[error("invalid commit mode {0:?}: expected \"two-pass\" or \"single-pass\"")]
    InvalidCommitMode(String),
}
