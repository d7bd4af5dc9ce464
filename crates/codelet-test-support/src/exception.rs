//! Exception handler double.

use std::sync::Mutex;

use async_trait::async_trait;
use codelet_outbox::error::OutboxError;
use codelet_outbox::processor::ExceptionHandler;

/// Records the message of every routed failure.
#[derive(Debug, Default)]
pub struct RecordingExceptionHandler {
    errors: Mutex<Vec<String>>,
}

impl RecordingExceptionHandler {
    /// Creates a handler with no recorded failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the recorded failure messages.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExceptionHandler for RecordingExceptionHandler {
    async fn handle(&self, error: OutboxError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}
