//! Transactional outbox for domain events.
//!
//! Entities buffer the domain events they raise. Committing a
//! [`context::DomainEventsContext`] serializes those events into
//! [`record::DomainEventRecord`]s and stores them in the same transaction as
//! the entity changes. A [`processor::DomainEventsProcessor`] later pulls the
//! oldest record, rebuilds its dispatcher through the
//! [`dispatcher::DomainEventsDispatcherFactory`], runs the handlers and
//! deletes the record. Delivery is at-least-once.

pub mod context;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod events;
pub mod memory;
pub mod processor;
pub mod record;
pub mod repository;
pub mod serializer;
pub mod session;
