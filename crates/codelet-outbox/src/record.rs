//! Serialized domain event envelopes (outbox rows).

use std::fmt;

use chrono::{DateTime, Utc};
use codelet_core::domain::{DomainEventArgs, DomainModel};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatcher::{DomainEventDispatcher, DomainEventsDispatcherFactory};
use crate::entity::{DatabaseEntity, DatabaseEntityWithModel, EntityId};
use crate::error::OutboxError;

/// Identifies the concrete `(model, event, entity, id)` types of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventTypeTag {
    /// Domain model type name.
    pub model: String,
    /// Event arguments type name.
    pub event: String,
    /// Owning entity type name.
    pub entity: String,
    /// Owning entity identifier type name.
    pub entity_id: String,
}

impl EventTypeTag {
    /// The tag for event `A` raised by entity `E`.
    #[must_use]
    pub fn of<E, A>() -> Self
    where
        E: DatabaseEntityWithModel,
        A: DomainEventArgs<E::Model>,
    {
        Self {
            model: <E::Model as DomainModel>::TYPE_NAME.to_owned(),
            event: A::EVENT_NAME.to_owned(),
            entity: <E as DatabaseEntity>::TYPE_NAME.to_owned(),
            entity_id: <E::Id as EntityId>::TYPE_NAME.to_owned(),
        }
    }
}

impl fmt::Display for EventTypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.model, self.event, self.entity, self.entity_id
        )
    }
}

/// Envelope content: type tag, owning entity id and serialized arguments.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SerializedDomainEvent {
    #[serde(rename = "type")]
    pub(crate) event_type: EventTypeTag,
    pub(crate) entity_id: serde_json::Value,
    pub(crate) args: String,
}

/// One durably stored domain event awaiting dispatch.
///
/// Records are created by the transfer step and never modified afterwards.
/// The content is self-describing: it alone determines which dispatcher
/// handles the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEventRecord {
    id: Uuid,
    occurred_at: DateTime<Utc>,
    content: String,
}

impl DomainEventRecord {
    pub(crate) fn create(
        occurred_at: DateTime<Utc>,
        event: &SerializedDomainEvent,
    ) -> Result<Self, OutboxError> {
        let content = serde_json::to_string(event).map_err(|e| {
            OutboxError::Serialization(format!("{}: {e}", event.event_type))
        })?;
        Ok(Self {
            id: Uuid::now_v7(),
            occurred_at,
            content,
        })
    }

    /// Rebuilds a record read back from storage.
    #[must_use]
    pub fn restore(id: Uuid, occurred_at: DateTime<Utc>, content: String) -> Self {
        Self {
            id,
            occurred_at,
            content,
        }
    }

    /// Unique record identifier, assigned at creation.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When the event occurred.
    #[must_use]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Opaque serialized content.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Reads the type tag embedded in the content.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Deserialization` if the content is malformed.
    pub fn event_type(&self) -> Result<EventTypeTag, OutboxError> {
        Ok(self.parse()?.event_type)
    }

    /// Rebuilds the dispatcher for this event.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Deserialization` for malformed content and
    /// `OutboxError::UnknownEventType` if no dispatcher is registered for the
    /// embedded type tag.
    pub fn deserialize(
        &self,
        factory: &DomainEventsDispatcherFactory,
    ) -> Result<DomainEventDispatcher, OutboxError> {
        let event = self.parse()?;
        factory.create(&event.event_type, event.entity_id, &event.args)
    }

    fn parse(&self) -> Result<SerializedDomainEvent, OutboxError> {
        serde_json::from_str(&self.content)
            .map_err(|e| OutboxError::Deserialization(format!("record {}: {e}", self.id)))
    }
}
