//! Storage session contract required by the outbox.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::events::DomainEventSource;
use crate::record::DomainEventRecord;

/// Whether a session may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatabaseAccess {
    /// Reads and commits are both allowed.
    #[default]
    ReadAndWrite,
    /// Reads only; every commit is rejected with `StorageError::ReadOnly`.
    ReadOnly,
}

/// A change-tracking unit of work over a transactional record store.
///
/// The outbox needs only a narrow surface: the tracked records that raise
/// domain events, a way to stage envelope inserts and deletes, an atomic
/// commit, and an oldest-first query over the envelope table.
#[async_trait]
pub trait OutboxSession: Send {
    /// Every tracked record that can raise domain events.
    fn domain_event_sources(&self) -> Vec<Arc<dyn DomainEventSource>>;

    /// Stages envelopes for insertion by the next commit.
    fn stage_domain_events(&mut self, records: Vec<DomainEventRecord>);

    /// Stages the deletion of a stored envelope.
    fn remove_domain_event(&mut self, record: &DomainEventRecord);

    /// Stops tracking every staged or loaded envelope, so later commits
    /// neither insert nor delete them.
    fn detach_domain_events(&mut self);

    /// Atomically writes every tracked change. On error nothing is written.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Commit` if the transaction fails, or
    /// `StorageError::ReadOnly` if the session may not write.
    async fn save_changes(&mut self) -> Result<(), StorageError>;

    /// Reads the stored envelope with the earliest `occurred_at`, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Query` if the store cannot be read.
    async fn oldest_domain_event(&mut self) -> Result<Option<DomainEventRecord>, StorageError>;
}
