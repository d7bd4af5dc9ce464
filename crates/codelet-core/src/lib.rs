//! Shared application-architecture primitives for Codelet services.
//!
//! This crate defines the optional-value type, the domain event handler
//! abstractions and the CQRS traits that the outbox and applications build
//! on. It contains no storage code.

pub mod cancellation;
pub mod clock;
pub mod cqrs;
pub mod domain;
pub mod error;
pub mod maybe;
