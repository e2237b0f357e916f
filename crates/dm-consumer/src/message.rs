//! The info-message payload and its parsing, shared by every backend.
//!
//! The wire format is a small JSON object; none of the backends that
//! deliver it (AMQP body, SQS message body, a database `payload` column)
//! impose a shape of their own; they just move bytes.

use dm_types::{EntityId, MessageUnparseable, RecordKey};
use error_stack::{Report, ResultExt, Result};
use serde::Deserialize;

/// A change event naming one source record and the entities affected by
/// its resolution state, as emitted by the entity-resolution engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoMessage {
    pub record: RecordKey,
    pub affected_entities: Vec<EntityId>,
}

#[derive(Deserialize)]
struct Wire {
    data_source: String,
    record_id: String,
    affected_entities: Vec<i64>,
}

impl InfoMessage {
    /// Parses one message body. The wire shape is intentionally
    /// permissive about key order and extra fields (`serde` ignores
    /// unknown keys by default) since the engine's own message format
    /// evolves independently of this service.
    pub fn parse(body: &[u8]) -> Result<Self, MessageUnparseable> {
        let wire: Wire = serde_json::from_slice(body)
            .change_context(MessageUnparseable)
            .attach_printable("info message body is not a recognized JSON shape")?;

        if wire.data_source.is_empty() || wire.record_id.is_empty() {
            return Err(Report::new(MessageUnparseable)
                .attach_printable("data_source and record_id must be non-empty"));
        }

        Ok(Self {
            record: RecordKey::new(wire.data_source, wire.record_id),
            affected_entities: wire.affected_entities.into_iter().map(EntityId::new).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_message() {
        let body = br#"{"data_source":"CUSTOMERS","record_id":"R1","affected_entities":[1,2]}"#;
        let message = InfoMessage::parse(body).unwrap();
        assert_eq!(message.record, RecordKey::new("CUSTOMERS", "R1"));
        assert_eq!(message.affected_entities, vec![EntityId::new(1), EntityId::new(2)]);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(InfoMessage::parse(b"not json").is_err());
    }

    #[test]
    fn rejects_empty_record_id() {
        let body = br#"{"data_source":"CUSTOMERS","record_id":"","affected_entities":[1]}"#;
        assert!(InfoMessage::parse(body).is_err());
    }

    #[test]
    fn tolerates_unknown_fields() {
        let body = br#"{"data_source":"A","record_id":"1","affected_entities":[],"extra":"ignored"}"#;
        assert!(InfoMessage::parse(body).is_ok());
    }
}
