//! Background loop that dispatches stored domain events one at a time.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codelet_core::cancellation::{Cancellation, CancellationSource};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::context::DomainEventsContext;
use crate::dispatcher::DomainEventsDispatcherFactory;
use crate::error::{ConfigError, OutboxError};
use crate::record::DomainEventRecord;
use crate::session::OutboxSession;

/// Environment variable holding the poll interval in milliseconds.
pub const POLL_INTERVAL_ENV: &str = "CODELET_OUTBOX_POLL_INTERVAL_MS";

/// Wait between polls of an empty outbox.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Configuration for [`DomainEventsProcessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// How long to sleep when the outbox is empty.
    pub poll_interval: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ProcessorConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPollInterval` if the interval is not a
    /// positive number of milliseconds.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`; unset keys keep their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPollInterval` if the interval is not a
    /// positive number of milliseconds.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let Some(value) = lookup(POLL_INTERVAL_ENV) else {
            return Ok(Self::default());
        };
        match value.trim().parse::<u64>() {
            Ok(millis) if millis > 0 => Ok(Self {
                poll_interval: Duration::from_millis(millis),
            }),
            _ => Err(ConfigError::InvalidPollInterval(value)),
        }
    }
}

/// Receives every failure of the processing loop except cancellation.
#[async_trait]
pub trait ExceptionHandler: Send + Sync {
    /// Handles one failed iteration. The loop continues afterwards.
    async fn handle(&self, error: OutboxError);
}

/// Logs failures through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingExceptionHandler;

#[async_trait]
impl ExceptionHandler for TracingExceptionHandler {
    async fn handle(&self, error: OutboxError) {
        error!(error = %error, "domain event processing failed");
    }
}

enum State {
    Stopped,
    Running {
        cancellation: CancellationSource,
        task: JoinHandle<()>,
    },
}

/// Pulls the oldest stored envelope, dispatches it, deletes it and commits,
/// one envelope at a time.
///
/// Failed envelopes stay in the outbox and are retried on a later
/// iteration, so handlers must tolerate being run more than once.
pub struct DomainEventsProcessor<S> {
    worker: Worker<S>,
    state: State,
}

impl<S: OutboxSession + 'static> DomainEventsProcessor<S> {
    /// Creates a stopped processor that logs failures and polls every
    /// [`DEFAULT_POLL_INTERVAL`].
    pub fn new(context: DomainEventsContext<S>, factory: DomainEventsDispatcherFactory) -> Self {
        Self {
            worker: Worker {
                context: Arc::new(Mutex::new(context)),
                factory: Arc::new(factory),
                exception_handler: Arc::new(TracingExceptionHandler),
                poll_interval: DEFAULT_POLL_INTERVAL,
            },
            state: State::Stopped,
        }
    }

    /// Replaces the exception handler. Takes effect on the next start.
    #[must_use]
    pub fn with_exception_handler(mut self, exception_handler: Arc<dyn ExceptionHandler>) -> Self {
        self.worker.exception_handler = exception_handler;
        self
    }

    /// Applies `config`. Takes effect on the next start.
    #[must_use]
    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.worker.poll_interval = config.poll_interval;
        self
    }

    /// The context the loop reads from and commits through.
    #[must_use]
    pub fn context(&self) -> Arc<Mutex<DomainEventsContext<S>>> {
        Arc::clone(&self.worker.context)
    }

    /// Returns `true` between [`start`](Self::start) and
    /// [`stop`](Self::stop).
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }

    /// Spawns the processing loop on the current tokio runtime. Does nothing
    /// if the loop is already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        let cancellation = CancellationSource::new();
        let task = tokio::spawn(self.worker.clone().run(cancellation.token()));
        self.state = State::Running { cancellation, task };
    }

    /// Cancels the loop and waits for it to finish. Does nothing if the loop
    /// is not running.
    pub async fn stop(&mut self) {
        let State::Running { cancellation, task } = std::mem::replace(&mut self.state, State::Stopped)
        else {
            return;
        };
        cancellation.cancel();
        if let Err(join_error) = task.await {
            if !join_error.is_cancelled() {
                error!(error = %join_error, "domain events processor task failed");
            }
        }
    }
}

impl<S> Drop for DomainEventsProcessor<S> {
    fn drop(&mut self) {
        if let State::Running { cancellation, .. } = &self.state {
            cancellation.cancel();
        }
    }
}

impl<S> fmt::Debug for DomainEventsProcessor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainEventsProcessor")
            .field("running", &matches!(self.state, State::Running { .. }))
            .field("poll_interval", &self.worker.poll_interval)
            .field("factory", &self.worker.factory)
            .finish_non_exhaustive()
    }
}

struct Worker<S> {
    context: Arc<Mutex<DomainEventsContext<S>>>,
    factory: Arc<DomainEventsDispatcherFactory>,
    exception_handler: Arc<dyn ExceptionHandler>,
    poll_interval: Duration,
}

impl<S> Clone for Worker<S> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            factory: Arc::clone(&self.factory),
            exception_handler: Arc::clone(&self.exception_handler),
            poll_interval: self.poll_interval,
        }
    }
}

impl<S: OutboxSession + 'static> Worker<S> {
    async fn run(self, cancellation: Cancellation) {
        info!(poll_interval = ?self.poll_interval, "domain events processor started");
        while !cancellation.is_cancelled() {
            let Err(error) = self.process_next(&cancellation).await else {
                continue;
            };
            self.context.lock().await.detach_domain_events();
            if error.is_cancellation() {
                continue;
            }
            self.exception_handler.handle(error).await;
            // The failed envelope is still the oldest; back off before retrying it.
            let _ = until_cancelled(&cancellation, tokio::time::sleep(self.poll_interval)).await;
        }
        info!("domain events processor stopped");
    }

    async fn process_next(&self, cancellation: &Cancellation) -> Result<(), OutboxError> {
        let record = self.acquire(cancellation).await?;
        debug!(
            event_id = %record.id(),
            occurred_at = %record.occurred_at(),
            "dispatching domain event"
        );

        let dispatcher = record.deserialize(&self.factory)?;
        until_cancelled(cancellation, dispatcher(cancellation.clone())).await??;

        let mut context = self.context.lock().await;
        context.remove_domain_event(&record);
        until_cancelled(cancellation, context.commit()).await??;
        Ok(())
    }

    async fn acquire(&self, cancellation: &Cancellation) -> Result<DomainEventRecord, OutboxError> {
        loop {
            if cancellation.is_cancelled() {
                return Err(OutboxError::Cancelled);
            }
            let oldest = {
                let mut context = self.context.lock().await;
                until_cancelled(cancellation, context.oldest_domain_event()).await??
            };
            if let Some(record) = oldest {
                return Ok(record);
            }
            trace!("outbox empty");
            until_cancelled(cancellation, tokio::time::sleep(self.poll_interval)).await?;
        }
    }
}

async fn until_cancelled<F: Future>(
    cancellation: &Cancellation,
    future: F,
) -> Result<F::Output, OutboxError> {
    tokio::select! {
        biased;
        () = cancellation.cancelled() => Err(OutboxError::Cancelled),
        output = future => Ok(output),
    }
}
