use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use sourcebook_core::EventId;

/// Contextual metadata travelling with an event.
///
/// `extra` is free-form; everything here is stored in [`RawEvent::context`](crate::RawEvent)
/// and comes back unchanged on load. Unknown top-level keys written by other
/// producers are folded into `extra` when reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    #[serde(default)]
    pub causation_id: Option<Uuid>,
    #[serde(default)]
    pub extra: Map<String, JsonValue>,
}

impl Context {
    /// Flatten into the string-keyed map stored with the raw event.
    pub fn to_map(&self) -> Map<String, JsonValue> {
        let mut map = Map::new();
        map.insert(
            "correlation_id".into(),
            self.correlation_id.map(|id| JsonValue::String(id.to_string())).unwrap_or(JsonValue::Null),
        );
        map.insert(
            "causation_id".into(),
            self.causation_id.map(|id| JsonValue::String(id.to_string())).unwrap_or(JsonValue::Null),
        );
        map.insert("extra".into(), JsonValue::Object(self.extra.clone()));
        map
    }

    pub fn from_map(map: &Map<String, JsonValue>) -> Result<Self, serde_json::Error> {
        const KNOWN: [&str; 3] = ["correlation_id", "causation_id", "extra"];

        let known = map
            .iter()
            .filter(|(key, _)| KNOWN.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let mut context: Self = serde_json::from_value(JsonValue::Object(known))?;
        for (key, value) in map.iter().filter(|(key, _)| !KNOWN.contains(&key.as_str())) {
            context.extra.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Ok(context)
    }
}

/// Envelope for an event, containing identity, versioning, and context metadata.
///
/// This is the unit callers append and get back from typed loads.
///
/// Notes:
/// - `version` is assigned by the store; `None` for versionless streams and
///   for envelopes that were not appended yet.
/// - `payload` is the domain event itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: EventId,
    version: Option<u64>,
    created_at: DateTime<Utc>,
    context: Context,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: EventId,
        version: Option<u64>,
        created_at: DateTime<Utc>,
        context: Context,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            version,
            created_at,
            context,
            payload,
        }
    }

    /// Wrap a bare event with a fresh id, the current time and empty context.
    pub fn wrap(payload: E) -> Self {
        Self::new(EventId::new(), None, Utc::now(), Context::default(), payload)
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn with_version(mut self, version: Option<u64>) -> Self {
        self.version = version;
        self
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl<E> From<E> for EventEnvelope<E> {
    fn from(value: E) -> Self {
        Self::wrap(value)
    }
}
