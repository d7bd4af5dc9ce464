//! Serializer double that rejects chosen events.

use codelet_outbox::error::OutboxError;
use codelet_outbox::serializer::{DomainEventsSerializer, JsonDomainEventsSerializer};

/// Serializes like [`JsonDomainEventsSerializer`] except for one event name,
/// whose serialization always fails.
#[derive(Debug, Clone)]
pub struct FailingSerializer {
    rejected_event: String,
}

impl FailingSerializer {
    /// Rejects every event named `event_name`.
    #[must_use]
    pub fn rejecting(event_name: &str) -> Self {
        Self {
            rejected_event: event_name.to_owned(),
        }
    }
}

impl DomainEventsSerializer for FailingSerializer {
    fn serialize(&self, event_name: &str, args: &serde_json::Value) -> Result<String, OutboxError> {
        if event_name == self.rejected_event {
            return Err(OutboxError::Serialization(format!(
                "{event_name}: rejected by test serializer"
            )));
        }
        JsonDomainEventsSerializer.serialize(event_name, args)
    }

    fn deserialize(&self, event_name: &str, content: &str) -> Result<serde_json::Value, OutboxError> {
        JsonDomainEventsSerializer.deserialize(event_name, content)
    }
}
