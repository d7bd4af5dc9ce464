//! Database entity abstractions.

use std::fmt::Debug;

use codelet_core::domain::DomainModel;
use codelet_core::maybe::HasContent;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::events::DomainEvents;

/// Identifier types usable by database entities.
///
/// `TYPE_NAME` is embedded in serialized event envelopes and must stay
/// stable across releases.
pub trait EntityId:
    Clone + Debug + HasContent + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Stable name of the identifier type.
    const TYPE_NAME: &'static str;
}

macro_rules! entity_id {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl EntityId for $ty {
                const TYPE_NAME: &'static str = $name;
            }
        )*
    };
}

entity_id!(
    i32 => "i32",
    i64 => "i64",
    u32 => "u32",
    u64 => "u64",
    String => "string",
    Uuid => "uuid",
);

/// A record persisted by a storage engine.
pub trait DatabaseEntity: Send + 'static {
    /// The identifier type.
    type Id: EntityId;

    /// Stable name of the entity type, embedded in serialized event envelopes.
    const TYPE_NAME: &'static str;

    /// Returns the identifier, or `None` until the storage engine assigns one.
    fn id(&self) -> Option<Self::Id>;
}

/// A database entity that wraps a domain model.
pub trait DatabaseEntityWithModel: DatabaseEntity {
    /// The wrapped domain model.
    type Model: DomainModel;

    /// Borrows the domain model.
    fn model(&self) -> &Self::Model;

    /// Consumes the entity, returning its domain model.
    fn into_model(self) -> Self::Model
    where
        Self: Sized;
}

/// A database entity whose domain model raises domain events.
///
/// Implementors own a [`DomainEvents`] buffer and raise events through it
/// from their own domain methods.
pub trait DomainModelDatabaseEntity: DatabaseEntityWithModel + Sized {
    /// The entity's pending domain events.
    fn domain_events(&self) -> &DomainEvents<Self>;
}
