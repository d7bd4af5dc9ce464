//! Order placement demo with asynchronous notifications delivered through the outbox.

pub mod error;
pub mod orders;
