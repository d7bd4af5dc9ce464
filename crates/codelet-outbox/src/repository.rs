//! Model-level repository abstraction.

use async_trait::async_trait;
use codelet_core::cancellation::Cancellation;
use codelet_core::maybe::{HasContent, Maybe};

use crate::entity::{DatabaseEntity, DatabaseEntityWithModel};
use crate::error::OutboxError;

/// Adds, removes and finds the domain models stored by entity `E`.
///
/// Changes are tracked by the underlying session and written by its next
/// commit.
#[async_trait]
pub trait Repository<E>: Send
where
    E: DatabaseEntityWithModel,
    E::Model: Clone + HasContent,
{
    /// Handle to an entity tracked by the repository.
    type Handle: Clone + Send;

    /// Starts tracking a new entity.
    fn add(&mut self, entity: E) -> Self::Handle;

    /// Marks a tracked entity for deletion.
    fn remove(&mut self, handle: &Self::Handle);

    /// The persistent identifier; absent until the first commit assigns it.
    fn get_id(&self, handle: &Self::Handle) -> Maybe<<E as DatabaseEntity>::Id>;

    /// Finds a model by identifier.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Cancelled` if cancellation was requested, or the
    /// storage error if the entity cannot be read.
    async fn find_by_id(
        &mut self,
        id: &<E as DatabaseEntity>::Id,
        cancellation: &Cancellation,
    ) -> Result<Maybe<E::Model>, OutboxError>;
}
