//! In-memory transactional record store implementing [`OutboxSession`].
//!
//! Entities are stored as JSON snapshots keyed by type name and identifier.
//! A commit works on a copy of the tables and swaps it in only when every
//! change applied, so a failed commit writes nothing.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use codelet_core::cancellation::Cancellation;
use codelet_core::error::DomainError;
use codelet_core::maybe::{HasContent, Maybe};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::dispatcher::DomainModelResolver;
use crate::entity::{DatabaseEntity, DatabaseEntityWithModel, DomainModelDatabaseEntity};
use crate::error::{OutboxError, StorageError};
use crate::events::DomainEventSource;
use crate::record::DomainEventRecord;
use crate::repository::Repository;
use crate::session::{DatabaseAccess, OutboxSession};

/// An entity the in-memory store can persist.
pub trait InMemoryEntity: DatabaseEntity + Serialize + DeserializeOwned {
    /// Gives a new entity its store-generated identity.
    ///
    /// Called during the first commit that saves an entity whose
    /// [`id`](DatabaseEntity::id) is `None`.
    fn assign_identity(&mut self, identity: i64);

    /// Exposes the tracked entity's domain event buffer to the outbox.
    ///
    /// Entities that raise domain events return
    /// `Some(tracked.as_domain_event_source())`.
    fn domain_event_source(tracked: &Tracked<Self>) -> Option<Arc<dyn DomainEventSource>> {
        let _ = tracked;
        None
    }
}

/// Shared handle to an entity tracked by an [`InMemorySession`].
pub struct Tracked<E>(Arc<Mutex<E>>);

impl<E: DatabaseEntity> Tracked<E> {
    fn new(entity: E) -> Self {
        Self(Arc::new(Mutex::new(entity)))
    }

    /// Locks the entity for reading or mutation.
    pub fn lock(&self) -> MutexGuard<'_, E> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with the entity locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        f(&mut self.lock())
    }

    /// The entity's identifier, if assigned.
    pub fn id(&self) -> Option<E::Id> {
        self.lock().id()
    }

    /// The entity viewed as a domain event source.
    pub fn as_domain_event_source(&self) -> Arc<dyn DomainEventSource>
    where
        E: DomainModelDatabaseEntity,
    {
        Arc::clone(&self.0) as Arc<dyn DomainEventSource>
    }

    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<E> Clone for Tracked<E> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<E> HasContent for Tracked<E> {
    fn has_content(&self) -> bool {
        true
    }
}

impl<E: fmt::Debug> fmt::Debug for Tracked<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_lock() {
            Ok(entity) => f.debug_tuple("Tracked").field(&*entity).finish(),
            Err(_) => f.write_str("Tracked(<locked>)"),
        }
    }
}

type EntityKey = (&'static str, String);

fn entity_key<E: DatabaseEntity>(id: &E::Id) -> Result<EntityKey, StorageError> {
    let id = serde_json::to_string(id)
        .map_err(|e| StorageError::Serialization(format!("{} identifier: {e}", E::TYPE_NAME)))?;
    Ok((E::TYPE_NAME, id))
}

trait TrackedEntry: Send + Sync {
    fn key(&self) -> Result<Option<EntityKey>, StorageError>;
    fn assign_identity(&self, identity: i64);
    fn snapshot(&self) -> Result<serde_json::Value, StorageError>;
    fn domain_event_source(&self) -> Option<Arc<dyn DomainEventSource>>;
    fn as_any(&self) -> &dyn Any;
}

impl<E: InMemoryEntity> TrackedEntry for Tracked<E> {
    fn key(&self) -> Result<Option<EntityKey>, StorageError> {
        self.id().map(|id| entity_key::<E>(&id)).transpose()
    }

    fn assign_identity(&self, identity: i64) {
        self.lock().assign_identity(identity);
    }

    fn snapshot(&self) -> Result<serde_json::Value, StorageError> {
        serde_json::to_value(&*self.lock())
            .map_err(|e| StorageError::Serialization(format!("{}: {e}", E::TYPE_NAME)))
    }

    fn domain_event_source(&self) -> Option<Arc<dyn DomainEventSource>> {
        E::domain_event_source(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Added,
    Unchanged,
    Deleted,
}

struct Entry {
    state: EntryState,
    entity: Box<dyn TrackedEntry>,
}

#[derive(Clone, Default)]
struct Tables {
    entities: HashMap<EntityKey, serde_json::Value>,
    domain_events: Vec<DomainEventRecord>,
    next_identity: i64,
}

#[derive(Default)]
struct InjectedFailures {
    successes_first: usize,
    remaining: usize,
}

struct Shared {
    tables: Mutex<Tables>,
    commits: AtomicUsize,
    injected: Mutex<InjectedFailures>,
}

/// A process-local transactional store.
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct InMemoryDatabase {
    shared: Arc<Shared>,
}

impl InMemoryDatabase {
    /// Creates an empty store. Generated identities start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables {
                    next_identity: 1,
                    ..Tables::default()
                }),
                commits: AtomicUsize::new(0),
                injected: Mutex::new(InjectedFailures::default()),
            }),
        }
    }

    /// Opens a new read-write unit of work.
    #[must_use]
    pub fn session(&self) -> InMemorySession {
        self.session_with_access(DatabaseAccess::ReadAndWrite)
    }

    /// Opens a new unit of work with the given access mode.
    #[must_use]
    pub fn session_with_access(&self, access: DatabaseAccess) -> InMemorySession {
        InMemorySession {
            database: self.clone(),
            access,
            entries: Vec::new(),
            staged_events: Vec::new(),
            attached_events: Vec::new(),
            removed_events: Vec::new(),
        }
    }

    /// Stored envelopes, oldest first.
    #[must_use]
    pub fn domain_events(&self) -> Vec<DomainEventRecord> {
        let mut records = self.tables().domain_events.clone();
        records.sort_by_key(DomainEventRecord::occurred_at);
        records
    }

    /// Number of successful commits so far.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    /// Makes the next `count` commits fail without writing anything.
    pub fn fail_next_commits(&self, count: usize) {
        self.fail_commits_after(0, count);
    }

    /// Lets `successes` commits through, then makes the following `count`
    /// commits fail without writing anything.
    pub fn fail_commits_after(&self, successes: usize, count: usize) {
        *self.injected() = InjectedFailures {
            successes_first: successes,
            remaining: count,
        };
    }

    /// Reads a committed entity, outside of any session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the stored snapshot does not
    /// decode into `E`.
    pub fn load<E: InMemoryEntity>(&self, id: &E::Id) -> Result<Option<E>, StorageError> {
        let key = entity_key::<E>(id)?;
        let Some(snapshot) = self.tables().entities.get(&key).cloned() else {
            return Ok(None);
        };
        serde_json::from_value(snapshot)
            .map(Some)
            .map_err(|e| StorageError::Serialization(format!("{}: {e}", E::TYPE_NAME)))
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.shared
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn injected(&self) -> MutexGuard<'_, InjectedFailures> {
        self.shared
            .injected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn take_injected_failure(&self) -> bool {
        let mut injected = self.injected();
        if injected.remaining == 0 {
            return false;
        }
        if injected.successes_first > 0 {
            injected.successes_first -= 1;
            return false;
        }
        injected.remaining -= 1;
        true
    }
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables();
        f.debug_struct("InMemoryDatabase")
            .field("entities", &tables.entities.len())
            .field("domain_events", &tables.domain_events.len())
            .field("commits", &self.commit_count())
            .finish()
    }
}

/// A change-tracking unit of work over an [`InMemoryDatabase`].
pub struct InMemorySession {
    database: InMemoryDatabase,
    access: DatabaseAccess,
    entries: Vec<Entry>,
    staged_events: Vec<DomainEventRecord>,
    attached_events: Vec<DomainEventRecord>,
    removed_events: Vec<Uuid>,
}

impl InMemorySession {
    /// Starts tracking a new entity; the next commit inserts it.
    pub fn add<E: InMemoryEntity>(&mut self, entity: E) -> Tracked<E> {
        let tracked = Tracked::new(entity);
        self.entries.push(Entry {
            state: EntryState::Added,
            entity: Box::new(tracked.clone()),
        });
        tracked
    }

    /// Finds an entity by identifier, tracking it if it was loaded.
    ///
    /// Returns the already tracked handle when the entity is tracked by this
    /// session, and nothing if it has been removed here.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the stored snapshot does not
    /// decode.
    pub fn find<E: InMemoryEntity>(&mut self, id: &E::Id) -> Result<Maybe<Tracked<E>>, StorageError> {
        let key = entity_key::<E>(id)?;
        for entry in &self.entries {
            let Some(tracked) = entry.entity.as_any().downcast_ref::<Tracked<E>>() else {
                continue;
            };
            if entry.entity.key()?.as_ref() == Some(&key) {
                if entry.state == EntryState::Deleted {
                    return Ok(Maybe::none());
                }
                return Ok(Maybe::of(tracked.clone()));
            }
        }

        let Some(entity) = self.database.load::<E>(id)? else {
            return Ok(Maybe::none());
        };
        let tracked = Tracked::new(entity);
        self.entries.push(Entry {
            state: EntryState::Unchanged,
            entity: Box::new(tracked.clone()),
        });
        Ok(Maybe::of(tracked))
    }

    /// Marks a tracked entity for deletion by the next commit.
    ///
    /// An entity added in this session and never committed is simply
    /// forgotten.
    pub fn remove<E: InMemoryEntity>(&mut self, tracked: &Tracked<E>) {
        let position = self.entries.iter().position(|entry| {
            entry
                .entity
                .as_any()
                .downcast_ref::<Tracked<E>>()
                .is_some_and(|candidate| candidate.same(tracked))
        });
        let Some(position) = position else {
            return;
        };
        if self.entries[position].state == EntryState::Added {
            self.entries.remove(position);
        } else {
            self.entries[position].state = EntryState::Deleted;
        }
    }

    /// Whether this session may commit.
    #[must_use]
    pub fn access(&self) -> DatabaseAccess {
        self.access
    }

    /// Number of tracked entities.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of envelope records tracked by this session.
    #[must_use]
    pub fn tracked_domain_event_count(&self) -> usize {
        self.staged_events.len() + self.attached_events.len() + self.removed_events.len()
    }

    fn apply(&self, tables: &mut Tables) -> Result<Vec<EntryState>, StorageError> {
        let mut states = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            match entry.state {
                EntryState::Deleted => {
                    if let Some(key) = entry.entity.key()? {
                        tables.entities.remove(&key);
                    }
                }
                EntryState::Added | EntryState::Unchanged => {
                    if entry.entity.key()?.is_none() {
                        entry.entity.assign_identity(tables.next_identity);
                        tables.next_identity += 1;
                    }
                    let key = entry.entity.key()?.ok_or_else(|| {
                        StorageError::Commit("entity has no identity after assignment".to_owned())
                    })?;
                    tables.entities.insert(key, entry.entity.snapshot()?);
                }
            }
            states.push(entry.state);
        }

        tables
            .domain_events
            .retain(|record| !self.removed_events.contains(&record.id()));
        tables
            .domain_events
            .extend(self.staged_events.iter().cloned());
        Ok(states)
    }
}

#[async_trait]
impl OutboxSession for InMemorySession {
    fn domain_event_sources(&self) -> Vec<Arc<dyn DomainEventSource>> {
        self.entries
            .iter()
            .filter(|entry| entry.state != EntryState::Deleted)
            .filter_map(|entry| entry.entity.domain_event_source())
            .collect()
    }

    fn stage_domain_events(&mut self, records: Vec<DomainEventRecord>) {
        self.staged_events.extend(records);
    }

    fn remove_domain_event(&mut self, record: &DomainEventRecord) {
        if let Some(position) = self
            .staged_events
            .iter()
            .position(|staged| staged.id() == record.id())
        {
            self.staged_events.remove(position);
            return;
        }
        self.attached_events.retain(|attached| attached.id() != record.id());
        if !self.removed_events.contains(&record.id()) {
            self.removed_events.push(record.id());
        }
    }

    fn detach_domain_events(&mut self) {
        self.staged_events.clear();
        self.attached_events.clear();
        self.removed_events.clear();
    }

    async fn save_changes(&mut self) -> Result<(), StorageError> {
        if self.access == DatabaseAccess::ReadOnly {
            return Err(StorageError::ReadOnly);
        }
        if self.database.take_injected_failure() {
            return Err(StorageError::Commit("injected commit failure".to_owned()));
        }

        let database = self.database.clone();
        let mut tables = database.tables();
        let mut updated = tables.clone();
        let applied = self.apply(&mut updated);
        // Identities handed to entities stay reserved even if the commit fails.
        tables.next_identity = updated.next_identity;
        applied?;
        *tables = updated;
        drop(tables);
        database.shared.commits.fetch_add(1, Ordering::SeqCst);

        self.entries.retain(|entry| entry.state != EntryState::Deleted);
        for entry in &mut self.entries {
            entry.state = EntryState::Unchanged;
        }
        let inserted = std::mem::take(&mut self.staged_events);
        self.attached_events.extend(inserted);
        self.removed_events.clear();
        Ok(())
    }

    async fn oldest_domain_event(&mut self) -> Result<Option<DomainEventRecord>, StorageError> {
        let oldest = self
            .database
            .tables()
            .domain_events
            .iter()
            .min_by_key(|record| record.occurred_at())
            .cloned();
        if let Some(record) = &oldest {
            if !self.attached_events.iter().any(|attached| attached.id() == record.id()) {
                self.attached_events.push(record.clone());
            }
        }
        Ok(oldest)
    }
}

impl fmt::Debug for InMemorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySession")
            .field("access", &self.access)
            .field("entries", &self.entries.len())
            .field("staged_events", &self.staged_events.len())
            .field("attached_events", &self.attached_events.len())
            .field("removed_events", &self.removed_events.len())
            .finish()
    }
}

#[async_trait]
impl<E> Repository<E> for InMemorySession
where
    E: InMemoryEntity + DatabaseEntityWithModel,
    E::Model: Clone + HasContent,
{
    type Handle = Tracked<E>;

    fn add(&mut self, entity: E) -> Tracked<E> {
        InMemorySession::add(self, entity)
    }

    fn remove(&mut self, handle: &Tracked<E>) {
        InMemorySession::remove(self, handle);
    }

    fn get_id(&self, handle: &Tracked<E>) -> Maybe<<E as DatabaseEntity>::Id> {
        handle.id().into()
    }

    async fn find_by_id(
        &mut self,
        id: &<E as DatabaseEntity>::Id,
        cancellation: &Cancellation,
    ) -> Result<Maybe<E::Model>, OutboxError> {
        if cancellation.is_cancelled() {
            return Err(OutboxError::Cancelled);
        }
        let found = self.find::<E>(id)?;
        Ok(found.map(|tracked| tracked.with(|entity| entity.model().clone())))
    }
}

/// Rehydrates models from committed snapshots for dispatch.
pub struct InMemoryModelResolver<E> {
    database: InMemoryDatabase,
    _entity: PhantomData<fn() -> E>,
}

impl<E> InMemoryModelResolver<E> {
    /// Creates a resolver reading from `database`.
    #[must_use]
    pub fn new(database: InMemoryDatabase) -> Self {
        Self {
            database,
            _entity: PhantomData,
        }
    }
}

#[async_trait]
impl<E> DomainModelResolver<E> for InMemoryModelResolver<E>
where
    E: InMemoryEntity + DatabaseEntityWithModel,
{
    async fn resolve(
        &self,
        entity_id: &E::Id,
        cancellation: &Cancellation,
    ) -> Result<E::Model, DomainError> {
        cancellation.check()?;
        let entity = self
            .database
            .load::<E>(entity_id)
            .map_err(|e| DomainError::Infrastructure(e.to_string()))?
            .ok_or_else(|| {
                DomainError::EntityNotFound(format!("{} {entity_id:?}", <E as DatabaseEntity>::TYPE_NAME))
            })?;
        Ok(entity.into_model())
    }
}
