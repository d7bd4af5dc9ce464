//! Type-tag registry that turns stored envelopes back into typed dispatches.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use codelet_core::cancellation::Cancellation;
use codelet_core::domain::{DomainEventArgs, DomainEventPipeline};
use codelet_core::error::DomainError;

use crate::entity::{DatabaseEntity, DatabaseEntityWithModel};
use crate::error::OutboxError;
use crate::record::EventTypeTag;
use crate::serializer::DomainEventsSerializer;

/// Future returned by a [`DomainEventDispatcher`].
pub type DispatchFuture = Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send>>;

/// A type-erased dispatch of one stored domain event to its handlers.
pub type DomainEventDispatcher = Box<dyn FnOnce(Cancellation) -> DispatchFuture + Send>;

type DispatcherBuilder =
    Arc<dyn Fn(serde_json::Value, &str) -> Result<DomainEventDispatcher, OutboxError> + Send + Sync>;

/// Loads the domain model owned by an entity so handlers can receive it.
#[async_trait]
pub trait DomainModelResolver<E: DatabaseEntityWithModel>: Send + Sync {
    /// Returns the current model of the entity identified by `entity_id`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::EntityNotFound` if the entity no longer exists,
    /// or an infrastructure error if it cannot be loaded.
    async fn resolve(
        &self,
        entity_id: &E::Id,
        cancellation: &Cancellation,
    ) -> Result<E::Model, DomainError>;
}

/// Registry mapping envelope type tags to dispatcher builders.
///
/// Every `(model, event, entity, id)` combination that can appear in the
/// outbox must be registered at startup, either with a pipeline or as
/// explicitly ignored.
pub struct DomainEventsDispatcherFactory {
    serializer: Arc<dyn DomainEventsSerializer>,
    builders: HashMap<EventTypeTag, DispatcherBuilder>,
}

impl DomainEventsDispatcherFactory {
    /// Creates an empty registry decoding arguments with `serializer`.
    #[must_use]
    pub fn new(serializer: Arc<dyn DomainEventsSerializer>) -> Self {
        Self {
            serializer,
            builders: HashMap::new(),
        }
    }

    /// Registers the handler pipeline for event `A` raised by entity `E`.
    ///
    /// The dispatcher resolves the owning model through `resolver` and runs
    /// the pipeline. When the pipeline has no handlers the model is not
    /// resolved at all. A later registration for the same tag replaces the
    /// earlier one.
    pub fn register<E, A>(
        &mut self,
        pipeline: DomainEventPipeline<E::Model, A>,
        resolver: Arc<dyn DomainModelResolver<E>>,
    ) -> &mut Self
    where
        E: DatabaseEntityWithModel,
        A: DomainEventArgs<E::Model>,
    {
        let pipeline = Arc::new(pipeline);
        let serializer = Arc::clone(&self.serializer);
        let builder: DispatcherBuilder = Arc::new(
            move |entity_id: serde_json::Value,
                  args: &str|
                  -> Result<DomainEventDispatcher, OutboxError> {
                let (entity_id, args) = decode::<E, A>(serializer.as_ref(), entity_id, args)?;
                let pipeline = Arc::clone(&pipeline);
                let resolver = Arc::clone(&resolver);
                let dispatcher: DomainEventDispatcher =
                    Box::new(move |cancellation: Cancellation| -> DispatchFuture {
                        Box::pin(async move {
                            if pipeline.handler_count() == 0 {
                                return Ok(());
                            }
                            let model = resolver.resolve(&entity_id, &cancellation).await?;
                            pipeline.handle(&model, &args, &cancellation).await
                        })
                    });
                Ok(dispatcher)
            },
        );
        self.builders.insert(EventTypeTag::of::<E, A>(), builder);
        self
    }

    /// Registers event `A` raised by entity `E` as known but unhandled.
    ///
    /// Its envelopes still decode, so malformed content is reported, and are
    /// then retired without side effects.
    pub fn register_ignored<E, A>(&mut self) -> &mut Self
    where
        E: DatabaseEntityWithModel,
        A: DomainEventArgs<E::Model>,
    {
        let serializer = Arc::clone(&self.serializer);
        let builder: DispatcherBuilder = Arc::new(
            move |entity_id: serde_json::Value,
                  args: &str|
                  -> Result<DomainEventDispatcher, OutboxError> {
                decode::<E, A>(serializer.as_ref(), entity_id, args)?;
                let dispatcher: DomainEventDispatcher =
                    Box::new(|_cancellation: Cancellation| -> DispatchFuture {
                        Box::pin(async { Ok(()) })
                    });
                Ok(dispatcher)
            },
        );
        self.builders.insert(EventTypeTag::of::<E, A>(), builder);
        self
    }

    /// Returns `true` if a dispatcher is registered for `tag`.
    #[must_use]
    pub fn is_registered(&self, tag: &EventTypeTag) -> bool {
        self.builders.contains_key(tag)
    }

    /// Builds the dispatcher for one envelope.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::UnknownEventType` for an unregistered tag and
    /// `OutboxError::Deserialization` if the identifier or arguments do not
    /// decode into the registered types.
    pub fn create(
        &self,
        tag: &EventTypeTag,
        entity_id: serde_json::Value,
        args: &str,
    ) -> Result<DomainEventDispatcher, OutboxError> {
        let builder = self
            .builders
            .get(tag)
            .ok_or_else(|| OutboxError::UnknownEventType(tag.to_string()))?;
        builder(entity_id, args)
    }
}

impl fmt::Debug for DomainEventsDispatcherFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<String> = self.builders.keys().map(ToString::to_string).collect();
        tags.sort();
        f.debug_struct("DomainEventsDispatcherFactory")
            .field("registered", &tags)
            .finish_non_exhaustive()
    }
}

fn decode<E, A>(
    serializer: &dyn DomainEventsSerializer,
    entity_id: serde_json::Value,
    args: &str,
) -> Result<(E::Id, A), OutboxError>
where
    E: DatabaseEntityWithModel,
    A: DomainEventArgs<E::Model>,
{
    let entity_id: <E as DatabaseEntity>::Id = serde_json::from_value(entity_id).map_err(|e| {
        OutboxError::Deserialization(format!("{} identifier: {e}", <E as DatabaseEntity>::TYPE_NAME))
    })?;
    let args = serializer.deserialize(A::EVENT_NAME, args)?;
    let args: A = serde_json::from_value(args)
        .map_err(|e| OutboxError::Deserialization(format!("{}: {e}", A::EVENT_NAME)))?;
    Ok((entity_id, args))
}
