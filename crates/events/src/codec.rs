//! Serialization capability.
//!
//! The store only dictates the calling contract: an envelope goes in together
//! with its stream, registered name, and assigned version; a [`RawEvent`] comes
//! out. The byte/wire format is the codec's business.

use thiserror::Error;

use sourcebook_core::StreamKey;

use crate::envelope::{Context, EventEnvelope};
use crate::event::Event;
use crate::raw::RawEvent;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("event type {0} is not registered")]
    UnregisteredType(&'static str),

    #[error("no event type registered under name '{0}'")]
    UnknownEventName(String),

    #[error("event '{name}' is registered as {registered}, not {requested}")]
    TypeMismatch {
        name: String,
        registered: &'static str,
        requested: &'static str,
    },

    #[error("failed to serialize event '{name}': {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to deserialize event '{name}': {source}")]
    Deserialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Converts between typed envelopes and raw records.
pub trait Codec: Send + Sync {
    fn serialize<E: Event>(
        &self,
        envelope: &EventEnvelope<E>,
        stream: &StreamKey,
        name: &str,
        version: Option<u64>,
    ) -> Result<RawEvent, CodecError>;

    fn deserialize<E: Event>(&self, raw: &RawEvent) -> Result<EventEnvelope<E>, CodecError>;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Copy, Clone, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn serialize<E: Event>(
        &self,
        envelope: &EventEnvelope<E>,
        stream: &StreamKey,
        name: &str,
        version: Option<u64>,
    ) -> Result<RawEvent, CodecError> {
        let payload = serde_json::to_value(envelope.payload()).map_err(|source| CodecError::Serialize {
            name: name.to_string(),
            source,
        })?;

        Ok(RawEvent {
            event_id: envelope.event_id(),
            stream: stream.clone(),
            version,
            name: name.to_string(),
            payload,
            context: envelope.context().to_map(),
            created_at: envelope.created_at(),
        })
    }

    fn deserialize<E: Event>(&self, raw: &RawEvent) -> Result<EventEnvelope<E>, CodecError> {
        let to_error = |source| CodecError::Deserialize {
            name: raw.name.clone(),
            source,
        };

        let payload: E = serde_json::from_value(raw.payload.clone()).map_err(to_error)?;
        let context = Context::from_map(&raw.context).map_err(to_error)?;

        Ok(EventEnvelope::new(
            raw.event_id,
            raw.version,
            raw.created_at,
            context,
            payload,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use serde::{Deserialize, Serialize};
    use sourcebook_core::{StreamAddress, StreamId, TenantId};
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct NastyEvent {
        uuid: Uuid,
        at: chrono::DateTime<Utc>,
        day: NaiveDate,
    }

    #[test]
    fn handles_json_unfriendly_types() -> anyhow::Result<()> {
        let key = StreamAddress::id(StreamId::new()).resolve(&TenantId::default())?;
        let event = NastyEvent {
            uuid: Uuid::now_v7(),
            at: Utc::now(),
            day: Utc::now().date_naive(),
        };
        let envelope = EventEnvelope::wrap(event.clone());

        let raw = JsonCodec.serialize(&envelope, &key, "nasty", Some(1))?;
        assert_eq!(raw.name, "nasty");
        assert_eq!(raw.version, Some(1));

        let back: EventEnvelope<NastyEvent> = JsonCodec.deserialize(&raw)?;
        assert_eq!(back.payload(), &event);
        assert_eq!(back.event_id(), envelope.event_id());
        assert_eq!(back.version(), Some(1));
        Ok(())
    }

    #[test]
    fn malformed_payload_is_a_deserialize_error() -> anyhow::Result<()> {
        let key = StreamAddress::named("s").resolve(&TenantId::default())?;
        let mut raw = JsonCodec.serialize(&EventEnvelope::wrap(1u32), &key, "count", None)?;
        raw.payload = serde_json::json!("not a number");

        let err = JsonCodec.deserialize::<u32>(&raw).unwrap_err();
        assert!(matches!(err, CodecError::Deserialize { name, .. } if name == "count"));
        Ok(())
    }
}
