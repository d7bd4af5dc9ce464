//! Pinned clock for deterministic event timestamps.

use chrono::{DateTime, Utc};
use codelet_core::clock::Clock;

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Freezes the clock at an RFC 3339 timestamp, e.g.
    /// `"2026-01-15T10:00:00Z"`.
    ///
    /// # Panics
    ///
    /// Panics if `timestamp` is not valid RFC 3339.
    #[must_use]
    pub fn at(timestamp: &str) -> Self {
        let instant = DateTime::parse_from_rfc3339(timestamp)
            .unwrap_or_else(|e| panic!("invalid test timestamp {timestamp:?}: {e}"));
        Self(instant.with_timezone(&Utc))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
