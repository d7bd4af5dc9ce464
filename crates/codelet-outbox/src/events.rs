//! Per-entity capture buffer for raised domain events.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};
use codelet_core::clock::{Clock, SystemClock};
use codelet_core::domain::DomainEventArgs;

use crate::entity::{DatabaseEntity, DatabaseEntityWithModel, DomainModelDatabaseEntity};
use crate::error::OutboxError;
use crate::record::{DomainEventRecord, EventTypeTag, SerializedDomainEvent};
use crate::serializer::DomainEventsSerializer;

type ArgsSerializer =
    Box<dyn Fn(&dyn DomainEventsSerializer) -> Result<String, OutboxError> + Send + Sync>;

/// A raised event that has not been written to the outbox yet.
///
/// The arguments are serialized at most once; the owning entity's
/// identifier is only embedded when the envelope is built.
pub struct PendingDomainEvent<E: DatabaseEntity> {
    occurred_at: DateTime<Utc>,
    event_type: EventTypeTag,
    serialize_args: ArgsSerializer,
    serialized_args: Option<String>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: DatabaseEntity> PendingDomainEvent<E> {
    /// When the event was raised.
    #[must_use]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Serializes the arguments, reusing the result of an earlier call.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error; nothing is cached in that case.
    pub fn prepare(&mut self, serializer: &dyn DomainEventsSerializer) -> Result<&str, OutboxError> {
        let args = match self.serialized_args.take() {
            Some(args) => args,
            None => (self.serialize_args)(serializer)?,
        };
        Ok(self.serialized_args.insert(args).as_str())
    }

    /// Builds the envelope owned by `entity_id`.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Serialization` if the arguments or the
    /// identifier cannot be serialized.
    pub fn execute(
        &mut self,
        serializer: &dyn DomainEventsSerializer,
        entity_id: &E::Id,
    ) -> Result<DomainEventRecord, OutboxError> {
        let entity_id = serde_json::to_value(entity_id)
            .map_err(|e| OutboxError::Serialization(format!("{}: {e}", self.event_type)))?;
        let args = self.prepare(serializer)?.to_owned();
        DomainEventRecord::create(
            self.occurred_at,
            &SerializedDomainEvent {
                event_type: self.event_type.clone(),
                entity_id,
                args,
            },
        )
    }
}

impl<E: DatabaseEntity> fmt::Debug for PendingDomainEvent<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingDomainEvent")
            .field("event_type", &self.event_type.to_string())
            .field("occurred_at", &self.occurred_at)
            .field("serialized", &self.serialized_args.is_some())
            .finish_non_exhaustive()
    }
}

struct Buffer<E: DatabaseEntity> {
    pending: Vec<PendingDomainEvent<E>>,
    in_flight: Vec<PendingDomainEvent<E>>,
    skip_next_transfer: bool,
    skip_in_flight: bool,
    last_offset: Option<TimeDelta>,
}

/// Domain events raised by one entity and not yet transferred to the outbox.
///
/// Appends and drains may interleave from different threads. Each event is
/// stamped at raise time with the buffer's creation time plus the monotonic
/// time elapsed since, so events raised later by the same entity always
/// carry a strictly later timestamp.
///
/// A transfer moves drained events *in flight*: they are dropped by
/// [`complete_transfer`](Self::complete_transfer) once the storage commit
/// succeeds, or put back by [`abort_transfer`](Self::abort_transfer).
pub struct DomainEvents<E: DatabaseEntity> {
    created: DateTime<Utc>,
    timer: Instant,
    buffer: Mutex<Buffer<E>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: DatabaseEntity> DomainEvents<E> {
    /// Creates a buffer stamped by `clock`.
    ///
    /// When `awaiting_identity` is set, the first transfer yields nothing so
    /// that events raised before the storage engine assigns the entity's
    /// identifier are only serialized once that identifier is final.
    #[must_use]
    pub fn new(clock: &dyn Clock, awaiting_identity: bool) -> Self {
        Self {
            created: clock.now(),
            timer: Instant::now(),
            buffer: Mutex::new(Buffer {
                pending: Vec::new(),
                in_flight: Vec::new(),
                skip_next_transfer: awaiting_identity,
                skip_in_flight: false,
                last_offset: None,
            }),
            _entity: PhantomData,
        }
    }

    /// Buffer for a brand-new entity whose identifier the storage engine
    /// assigns on first save.
    #[must_use]
    pub fn awaiting_identity() -> Self {
        Self::new(&SystemClock, true)
    }

    /// Buffer for an entity that already has its final identifier (loaded
    /// from storage, or identified by the client).
    #[must_use]
    pub fn with_identity() -> Self {
        Self::new(&SystemClock, false)
    }

    /// Number of events waiting for transfer.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Buffers a domain event raised by the owning entity.
    ///
    /// Serialization is deferred to transfer time; the entity identifier is
    /// read then as well.
    pub fn raise<A>(&self, args: A)
    where
        E: DatabaseEntityWithModel,
        A: DomainEventArgs<E::Model>,
    {
        let mut buffer = self.lock();
        let occurred_at = self.next_occurrence(&mut buffer);
        let serialize_args: ArgsSerializer = Box::new(
            move |serializer: &dyn DomainEventsSerializer| -> Result<String, OutboxError> {
                let value = serde_json::to_value(&args).map_err(|e| {
                    OutboxError::Serialization(format!("{}: {e}", EventTypeTag::of::<E, A>()))
                })?;
                serializer.serialize(A::EVENT_NAME, &value)
            },
        );
        buffer.pending.push(PendingDomainEvent {
            occurred_at,
            event_type: EventTypeTag::of::<E, A>(),
            serialize_args,
            serialized_args: None,
            _entity: PhantomData,
        });
    }

    /// Drains pending events into envelopes owned by `entity_id`.
    ///
    /// Returns nothing if this is the suppressed first transfer of a new
    /// entity; that transfer still serializes the pending arguments, so a
    /// serializer failure surfaces before the entity is first saved. If any
    /// event fails to serialize, every drained event is put back and the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::MissingEntityId` if events are pending but the
    /// entity has no identifier, or the serializer's error.
    pub fn transfer(
        &self,
        entity_id: Option<&E::Id>,
        serializer: &dyn DomainEventsSerializer,
    ) -> Result<Vec<DomainEventRecord>, OutboxError> {
        let mut buffer = self.lock();
        if buffer.skip_next_transfer {
            for event in &mut buffer.pending {
                event.prepare(serializer)?;
            }
            buffer.skip_next_transfer = false;
            buffer.skip_in_flight = true;
            return Ok(Vec::new());
        }
        if buffer.pending.is_empty() {
            return Ok(Vec::new());
        }
        let Some(entity_id) = entity_id else {
            return Err(OutboxError::MissingEntityId {
                entity: E::TYPE_NAME,
            });
        };

        let mut drained = std::mem::take(&mut buffer.pending);
        let records: Result<Vec<_>, _> = drained
            .iter_mut()
            .map(|event| event.execute(serializer, entity_id))
            .collect();
        match records {
            Ok(records) => {
                buffer.in_flight.extend(drained);
                Ok(records)
            }
            Err(error) => {
                buffer.pending.extend(drained);
                Err(error)
            }
        }
    }

    /// Forgets the events of the last transfers; they are now stored.
    pub fn complete_transfer(&self) {
        let mut buffer = self.lock();
        buffer.in_flight.clear();
        buffer.skip_in_flight = false;
    }

    /// Puts the events of the last transfers back into the buffer, including
    /// a consumed first-transfer suppression.
    pub fn abort_transfer(&self) {
        let mut buffer = self.lock();
        let in_flight = std::mem::take(&mut buffer.in_flight);
        buffer.pending.extend(in_flight);
        if buffer.skip_in_flight {
            buffer.skip_in_flight = false;
            buffer.skip_next_transfer = true;
        }
    }

    fn next_occurrence(&self, buffer: &mut Buffer<E>) -> DateTime<Utc> {
        let elapsed = i64::try_from(self.timer.elapsed().as_micros()).unwrap_or(i64::MAX);
        let elapsed = TimeDelta::microseconds(elapsed);
        let offset = match buffer.last_offset {
            Some(last) if elapsed <= last => last + TimeDelta::microseconds(1),
            _ => elapsed,
        };
        buffer.last_offset = Some(offset);
        self.created
            .checked_add_signed(offset)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn lock(&self) -> MutexGuard<'_, Buffer<E>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: DatabaseEntity> Default for DomainEvents<E> {
    fn default() -> Self {
        Self::with_identity()
    }
}

impl<E: DatabaseEntity> fmt::Debug for DomainEvents<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buffer = self.lock();
        f.debug_struct("DomainEvents")
            .field("created", &self.created)
            .field("pending", &buffer.pending.len())
            .field("in_flight", &buffer.in_flight.len())
            .field("skip_next_transfer", &buffer.skip_next_transfer)
            .finish()
    }
}

/// A tracked record whose pending domain events the transfer step drains.
pub trait DomainEventSource: Send + Sync {
    /// Drains pending events into envelopes. See [`DomainEvents::transfer`].
    ///
    /// # Errors
    ///
    /// Returns the transfer failure; drained events are put back.
    fn transfer_domain_events(
        &self,
        serializer: &dyn DomainEventsSerializer,
    ) -> Result<Vec<DomainEventRecord>, OutboxError>;

    /// The envelopes of the last transfers were stored.
    fn complete_domain_events_transfer(&self);

    /// The envelopes of the last transfers were not stored.
    fn abort_domain_events_transfer(&self);
}

impl<E: DomainModelDatabaseEntity> DomainEventSource for Mutex<E> {
    fn transfer_domain_events(
        &self,
        serializer: &dyn DomainEventsSerializer,
    ) -> Result<Vec<DomainEventRecord>, OutboxError> {
        let entity = self.lock().unwrap_or_else(PoisonError::into_inner);
        let entity_id = entity.id();
        entity
            .domain_events()
            .transfer(entity_id.as_ref(), serializer)
    }

    fn complete_domain_events_transfer(&self) {
        let entity = self.lock().unwrap_or_else(PoisonError::into_inner);
        entity.domain_events().complete_transfer();
    }

    fn abort_domain_events_transfer(&self) {
        let entity = self.lock().unwrap_or_else(PoisonError::into_inner);
        entity.domain_events().abort_transfer();
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use codelet_core::domain::DomainModel;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::serializer::JsonDomainEventsSerializer;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[derive(Debug)]
    struct Ticket;

    impl DomainModel for Ticket {
        const TYPE_NAME: &'static str = "Ticket";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Opened {
        title: String,
    }

    impl DomainEventArgs<Ticket> for Opened {
        const EVENT_NAME: &'static str = "Opened";
    }

    struct TicketRecord {
        id: Option<u64>,
        model: Ticket,
        events: DomainEvents<TicketRecord>,
    }

    impl DatabaseEntity for TicketRecord {
        type Id = u64;
        const TYPE_NAME: &'static str = "TicketRecord";

        fn id(&self) -> Option<u64> {
            self.id
        }
    }

    impl DatabaseEntityWithModel for TicketRecord {
        type Model = Ticket;

        fn model(&self) -> &Ticket {
            &self.model
        }

        fn into_model(self) -> Ticket {
            self.model
        }
    }

    impl DomainModelDatabaseEntity for TicketRecord {
        fn domain_events(&self) -> &DomainEvents<Self> {
            &self.events
        }
    }

    struct RejectingSerializer;

    impl DomainEventsSerializer for RejectingSerializer {
        fn serialize(&self, event_name: &str, _args: &serde_json::Value) -> Result<String, OutboxError> {
            Err(OutboxError::Serialization(format!("{event_name} rejected")))
        }

        fn deserialize(&self, event_name: &str, _content: &str) -> Result<serde_json::Value, OutboxError> {
            Err(OutboxError::Deserialization(format!("{event_name} rejected")))
        }
    }

    fn opened(title: &str) -> Opened {
        Opened {
            title: title.to_owned(),
        }
    }

    #[test]
    fn test_transfer_drains_all_pending_events() {
        // Arrange
        let events = DomainEvents::<TicketRecord>::with_identity();
        events.raise(opened("a"));
        events.raise(opened("b"));

        // Act
        let records = events.transfer(Some(&3), &JsonDomainEventsSerializer).unwrap();

        // Assert
        assert_eq!(records.len(), 2);
        assert_eq!(events.pending_count(), 0);
        let tag = records[0].event_type().unwrap();
        assert_eq!(tag.to_string(), "Ticket/Opened/TicketRecord/u64");
    }

    #[test]
    fn test_second_transfer_without_new_events_is_empty() {
        let events = DomainEvents::<TicketRecord>::with_identity();
        events.raise(opened("a"));

        let first = events.transfer(Some(&1), &JsonDomainEventsSerializer).unwrap();
        let second = events.transfer(Some(&1), &JsonDomainEventsSerializer).unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn test_first_transfer_of_new_entity_is_suppressed_once() {
        // Arrange
        let events = DomainEvents::<TicketRecord>::awaiting_identity();
        events.raise(opened("created"));

        // Act
        let first = events.transfer(None, &JsonDomainEventsSerializer).unwrap();
        let second = events.transfer(Some(&9), &JsonDomainEventsSerializer).unwrap();
        events.raise(opened("later"));
        let third = events.transfer(Some(&9), &JsonDomainEventsSerializer).unwrap();

        // Assert
        assert!(first.is_empty());
        assert_eq!(second.len(), 1);
        assert_eq!(third.len(), 1);
    }

    #[test]
    fn test_suppressed_transfer_surfaces_serializer_failure() {
        // Arrange
        let events = DomainEvents::<TicketRecord>::awaiting_identity();
        events.raise(opened("created"));

        // Act
        let rejected = events.transfer(None, &RejectingSerializer);
        let suppressed = events.transfer(None, &JsonDomainEventsSerializer).unwrap();
        let records = events.transfer(Some(&5), &JsonDomainEventsSerializer).unwrap();

        // Assert
        assert!(matches!(rejected, Err(OutboxError::Serialization(_))));
        assert!(suppressed.is_empty());
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_arguments_serialized_by_suppressed_transfer_are_reused() {
        let events = DomainEvents::<TicketRecord>::awaiting_identity();
        events.raise(opened("created"));
        assert!(events.transfer(None, &JsonDomainEventsSerializer).unwrap().is_empty());

        let records = events.transfer(Some(&6), &RejectingSerializer).unwrap();

        let content: serde_json::Value = serde_json::from_str(records[0].content()).unwrap();
        assert_eq!(content["entity_id"], serde_json::json!(6));
        assert_eq!(content["args"], serde_json::json!(r#"{"title":"created"}"#));
    }

    #[test]
    fn test_events_raised_later_are_stamped_strictly_later() {
        // Arrange
        let created = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let events = DomainEvents::<TicketRecord>::new(&FixedClock(created), false);
        for index in 0..50 {
            events.raise(opened(&index.to_string()));
        }

        // Act
        let mut records = events.transfer(Some(&1), &JsonDomainEventsSerializer).unwrap();
        records.sort_by_key(DomainEventRecord::occurred_at);

        // Assert
        assert!(records[0].occurred_at() >= created);
        for pair in records.windows(2) {
            assert!(pair[0].occurred_at() < pair[1].occurred_at());
        }
        let titles: Vec<String> = records
            .iter()
            .map(|record| {
                let content: serde_json::Value = serde_json::from_str(record.content()).unwrap();
                let args: serde_json::Value =
                    serde_json::from_str(content["args"].as_str().unwrap()).unwrap();
                args["title"].as_str().unwrap().to_owned()
            })
            .collect();
        let expected: Vec<String> = (0..50).map(|index: i32| index.to_string()).collect();
        assert_eq!(titles, expected);
    }

    #[test]
    fn test_serializer_failure_puts_events_back() {
        let events = DomainEvents::<TicketRecord>::with_identity();
        events.raise(opened("a"));
        events.raise(opened("b"));

        let result = events.transfer(Some(&1), &RejectingSerializer);

        assert!(matches!(result, Err(OutboxError::Serialization(_))));
        assert_eq!(events.pending_count(), 2);
        let retried = events.transfer(Some(&1), &JsonDomainEventsSerializer).unwrap();
        assert_eq!(retried.len(), 2);
    }

    #[test]
    fn test_pending_events_without_identity_are_rejected() {
        let events = DomainEvents::<TicketRecord>::with_identity();
        events.raise(opened("a"));

        let result = events.transfer(None, &JsonDomainEventsSerializer);

        assert!(matches!(
            result,
            Err(OutboxError::MissingEntityId {
                entity: "TicketRecord"
            })
        ));
        assert_eq!(events.pending_count(), 1);
    }

    #[test]
    fn test_abort_restores_in_flight_events_and_suppression() {
        // Arrange
        let events = DomainEvents::<TicketRecord>::awaiting_identity();
        events.raise(opened("a"));
        assert!(events.transfer(None, &JsonDomainEventsSerializer).unwrap().is_empty());

        // Act
        events.abort_transfer();

        // Assert
        assert!(events.transfer(None, &JsonDomainEventsSerializer).unwrap().is_empty());
        events.complete_transfer();
        let records = events.transfer(Some(&2), &JsonDomainEventsSerializer).unwrap();
        assert_eq!(records.len(), 1);
        events.abort_transfer();
        assert_eq!(events.pending_count(), 1);
    }

    #[test]
    fn test_mutex_wrapped_entity_reads_identifier_at_transfer_time() {
        // Arrange
        let entity = Mutex::new(TicketRecord {
            id: None,
            model: Ticket,
            events: DomainEvents::awaiting_identity(),
        });
        entity.lock().unwrap().events.raise(opened("a"));
        let source: &dyn DomainEventSource = &entity;
        assert!(source.transfer_domain_events(&JsonDomainEventsSerializer).unwrap().is_empty());

        // Act
        entity.lock().unwrap().id = Some(77);
        let records = source.transfer_domain_events(&JsonDomainEventsSerializer).unwrap();

        // Assert
        assert_eq!(records.len(), 1);
        let content: serde_json::Value = serde_json::from_str(records[0].content()).unwrap();
        assert_eq!(content["entity_id"], serde_json::json!(77));
    }

    #[test]
    fn test_concurrent_raises_are_all_transferred() {
        let events = std::sync::Arc::new(DomainEvents::<TicketRecord>::with_identity());

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let events = std::sync::Arc::clone(&events);
                std::thread::spawn(move || {
                    for index in 0..25 {
                        events.raise(opened(&format!("{worker}-{index}")));
                    }
                })
            })
            .collect();
        let mut transferred = 0;
        for worker in workers {
            worker.join().unwrap();
            transferred += events.transfer(Some(&1), &JsonDomainEventsSerializer).unwrap().len();
        }
        transferred += events.transfer(Some(&1), &JsonDomainEventsSerializer).unwrap().len();

        assert_eq!(transferred, 100);
    }
}
