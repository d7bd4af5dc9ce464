//! Domain model and domain event handler abstractions.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cancellation::Cancellation;
use crate::error::DomainError;

/// Marker trait for domain models that raise domain events.
pub trait DomainModel: Send + Sync + 'static {
    /// Stable name of the model, embedded in serialized event envelopes.
    const TYPE_NAME: &'static str;
}

/// Arguments of a domain event raised by the domain model `M`.
pub trait DomainEventArgs<M: DomainModel>: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable name of the event, embedded in serialized event envelopes.
    const EVENT_NAME: &'static str;
}

/// Reacts to one kind of domain event.
#[async_trait]
pub trait DomainEventHandler<M, A>: Send + Sync
where
    M: DomainModel,
    A: DomainEventArgs<M>,
{
    /// Handles the event raised by `sender`.
    ///
    /// Handlers may run more than once for the same event and must tolerate
    /// re-execution.
    async fn handle(
        &self,
        sender: &M,
        args: &A,
        cancellation: &Cancellation,
    ) -> Result<(), DomainError>;
}

/// Ambient context held open around a single handler invocation.
///
/// The release action runs when the scope is dropped.
pub struct Scope {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Scope {
    /// Creates a scope that runs `release` when dropped.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A scope with nothing to release.
    #[must_use]
    pub fn empty() -> Self {
        Self { release: None }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("pending_release", &self.release.is_some())
            .finish()
    }
}

/// Opens a scope around handler invocations for a given model.
pub trait DomainModelScopeProvider<M: DomainModel>: Send + Sync {
    /// Creates the scope for `model`.
    fn create_scope(&self, model: &M) -> Scope;
}

/// Opens a scope around handler invocations for a given event.
pub trait DomainEventScopeProvider<M: DomainModel, A: DomainEventArgs<M>>: Send + Sync {
    /// Creates the scope for `args`.
    fn create_scope(&self, args: &A) -> Scope;
}

/// All handlers registered for one `(model, event)` pair, with their scope
/// providers.
///
/// Handlers run in registration order. Every handler invocation gets fresh
/// scopes from every provider: model scopes are acquired first and released
/// last.
pub struct DomainEventPipeline<M: DomainModel, A: DomainEventArgs<M>> {
    handlers: Vec<Arc<dyn DomainEventHandler<M, A>>>,
    model_scope_providers: Vec<Arc<dyn DomainModelScopeProvider<M>>>,
    event_scope_providers: Vec<Arc<dyn DomainEventScopeProvider<M, A>>>,
}

impl<M: DomainModel, A: DomainEventArgs<M>> DomainEventPipeline<M, A> {
    /// Creates an empty pipeline. Dispatching through it is a no-op.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            model_scope_providers: Vec::new(),
            event_scope_providers: Vec::new(),
        }
    }

    /// Appends a handler.
    #[must_use]
    pub fn with_handler(self, handler: impl DomainEventHandler<M, A> + 'static) -> Self {
        self.with_shared_handler(Arc::new(handler))
    }

    /// Appends a handler that is shared with other owners.
    #[must_use]
    pub fn with_shared_handler(mut self, handler: Arc<dyn DomainEventHandler<M, A>>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Adds a model scope provider.
    #[must_use]
    pub fn with_model_scope(mut self, provider: impl DomainModelScopeProvider<M> + 'static) -> Self {
        self.model_scope_providers.push(Arc::new(provider));
        self
    }

    /// Adds an event scope provider.
    #[must_use]
    pub fn with_event_scope(
        mut self,
        provider: impl DomainEventScopeProvider<M, A> + 'static,
    ) -> Self {
        self.event_scope_providers.push(Arc::new(provider));
        self
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Runs every handler for the event raised by `sender`.
    ///
    /// # Errors
    ///
    /// Stops at the first failing handler and returns its error. Returns
    /// `DomainError::Cancelled` if cancellation is observed between handlers.
    pub async fn handle(
        &self,
        sender: &M,
        args: &A,
        cancellation: &Cancellation,
    ) -> Result<(), DomainError> {
        for handler in &self.handlers {
            cancellation.check()?;

            let _model_scopes: Vec<Scope> = self
                .model_scope_providers
                .iter()
                .map(|provider| provider.create_scope(sender))
                .collect();
            let _event_scopes: Vec<Scope> = self
                .event_scope_providers
                .iter()
                .map(|provider| provider.create_scope(args))
                .collect();

            handler.handle(sender, args, cancellation).await?;
        }
        Ok(())
    }
}

impl<M: DomainModel, A: DomainEventArgs<M>> Default for DomainEventPipeline<M, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: DomainModel, A: DomainEventArgs<M>> fmt::Debug for DomainEventPipeline<M, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainEventPipeline")
            .field("model", &M::TYPE_NAME)
            .field("event", &A::EVENT_NAME)
            .field("handlers", &self.handlers.len())
            .field("model_scope_providers", &self.model_scope_providers.len())
            .field("event_scope_providers", &self.event_scope_providers.len())
            .finish()
    }
}
