//! Pluggable serialization of domain event arguments.

use crate::error::OutboxError;

/// Converts domain event arguments to and from their stored string form.
///
/// Arguments arrive as JSON values produced by `serde`; the serializer
/// decides how they are encoded inside the envelope.
pub trait DomainEventsSerializer: Send + Sync {
    /// Encodes the arguments of the event named `event_name`.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Serialization` if the arguments cannot be encoded.
    fn serialize(&self, event_name: &str, args: &serde_json::Value) -> Result<String, OutboxError>;

    /// Decodes arguments previously produced by [`serialize`](Self::serialize).
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Deserialization` if `content` is malformed.
    fn deserialize(&self, event_name: &str, content: &str) -> Result<serde_json::Value, OutboxError>;
}

/// Stores event arguments as compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDomainEventsSerializer;

impl DomainEventsSerializer for JsonDomainEventsSerializer {
    fn serialize(&self, event_name: &str, args: &serde_json::Value) -> Result<String, OutboxError> {
        serde_json::to_string(args)
            .map_err(|e| OutboxError::Serialization(format!("{event_name}: {e}")))
    }

    fn deserialize(&self, event_name: &str, content: &str) -> Result<serde_json::Value, OutboxError> {
        serde_json::from_str(content)
            .map_err(|e| OutboxError::Deserialization(format!("{event_name}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_serializer_round_trips_arguments() {
        let serializer = JsonDomainEventsSerializer;
        let args = serde_json::json!({"order_id": 7, "lines": ["a", "b"]});

        let content = serializer.serialize("OrderPlaced", &args).unwrap();
        let restored = serializer.deserialize("OrderPlaced", &content).unwrap();

        assert_eq!(restored, args);
    }

    #[test]
    fn test_json_serializer_rejects_malformed_content() {
        let result = JsonDomainEventsSerializer.deserialize("OrderPlaced", "{not json");

        match result {
            Err(OutboxError::Deserialization(message)) => {
                assert!(message.starts_with("OrderPlaced: "));
            }
            other => panic!("expected Deserialization, got {other:?}"),
        }
    }
}
