//! Shared test doubles and utilities for the Codelet workspace.

mod clock;
mod exception;
mod handlers;
mod scope;
mod serializer;

pub use clock::FixedClock;
pub use exception::RecordingExceptionHandler;
pub use handlers::{BlockingHandler, FailingHandler, InvocationLog, RecordingHandler};
pub use scope::RecordingScopeProvider;
pub use serializer::FailingSerializer;
