//! Error types for the demo binary.

use std::time::Duration;

use codelet_core::error::DomainError;
use codelet_outbox::error::ConfigError;
use thiserror::Error;

/// Startup and runtime errors for the demo binary.
#[derive(Debug, Error)]
pub enum DemoError {
    /// An environment variable holds an invalid value.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A command or query failed.
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    /// The outbox still held events when the deadline passed.
    #[error("outbox not drained within {0:?}")]
    DrainTimeout(Duration),
}
