//! Domain event handler doubles.
//!
//! Every handler appends a line to a shared [`InvocationLog`] so tests can
//! assert on invocation order across handlers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use codelet_core::cancellation::Cancellation;
use codelet_core::domain::{DomainEventArgs, DomainEventHandler, DomainModel};
use codelet_core::error::DomainError;

/// Shared, ordered record of handler invocations and scope transitions.
#[derive(Debug, Clone, Default)]
pub struct InvocationLog(Arc<Mutex<Vec<String>>>);

impl InvocationLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one line.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn push(&self, line: impl Into<String>) {
        self.0.lock().unwrap().push(line.into());
    }

    /// Returns a snapshot of all lines.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Number of lines starting with `prefix`.
    #[must_use]
    pub fn count_starting_with(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }
}

fn describe<M: DomainModel, A: DomainEventArgs<M>>(name: &str, args: &A) -> String {
    let args = serde_json::to_string(args).unwrap_or_else(|e| format!("<unserializable: {e}>"));
    format!("{name} {args}")
}

/// A handler that records `"{name} {args as JSON}"` and succeeds.
#[derive(Debug, Clone)]
pub struct RecordingHandler {
    name: String,
    log: InvocationLog,
}

impl RecordingHandler {
    /// Creates a handler writing to `log`.
    #[must_use]
    pub fn new(name: &str, log: &InvocationLog) -> Self {
        Self {
            name: name.to_owned(),
            log: log.clone(),
        }
    }
}

#[async_trait]
impl<M, A> DomainEventHandler<M, A> for RecordingHandler
where
    M: DomainModel,
    A: DomainEventArgs<M>,
{
    async fn handle(
        &self,
        _sender: &M,
        args: &A,
        _cancellation: &Cancellation,
    ) -> Result<(), DomainError> {
        self.log.push(describe::<M, A>(&self.name, args));
        Ok(())
    }
}

/// A handler that fails its first `failures` invocations with
/// `DomainError::Handler`, then succeeds. Every attempt is recorded.
#[derive(Debug)]
pub struct FailingHandler {
    name: String,
    log: InvocationLog,
    failures_remaining: AtomicUsize,
}

impl FailingHandler {
    /// Creates a handler that fails `failures` times before succeeding.
    #[must_use]
    pub fn new(name: &str, log: &InvocationLog, failures: usize) -> Self {
        Self {
            name: name.to_owned(),
            log: log.clone(),
            failures_remaining: AtomicUsize::new(failures),
        }
    }

    /// Creates a handler that never succeeds.
    #[must_use]
    pub fn always(name: &str, log: &InvocationLog) -> Self {
        Self::new(name, log, usize::MAX)
    }
}

#[async_trait]
impl<M, A> DomainEventHandler<M, A> for FailingHandler
where
    M: DomainModel,
    A: DomainEventArgs<M>,
{
    async fn handle(
        &self,
        _sender: &M,
        args: &A,
        _cancellation: &Cancellation,
    ) -> Result<(), DomainError> {
        self.log.push(describe::<M, A>(&self.name, args));
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(DomainError::Handler(format!("{} failed", self.name)))
        } else {
            Ok(())
        }
    }
}

/// A handler that records its start and then waits until cancelled.
#[derive(Debug, Clone)]
pub struct BlockingHandler {
    name: String,
    log: InvocationLog,
}

impl BlockingHandler {
    /// Creates a handler writing to `log`.
    #[must_use]
    pub fn new(name: &str, log: &InvocationLog) -> Self {
        Self {
            name: name.to_owned(),
            log: log.clone(),
        }
    }
}

#[async_trait]
impl<M, A> DomainEventHandler<M, A> for BlockingHandler
where
    M: DomainModel,
    A: DomainEventArgs<M>,
{
    async fn handle(
        &self,
        _sender: &M,
        args: &A,
        cancellation: &Cancellation,
    ) -> Result<(), DomainError> {
        self.log.push(describe::<M, A>(&self.name, args));
        cancellation.cancelled().await;
        Err(DomainError::Cancelled)
    }
}
