use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use sourcebook_core::{EventId, Position, StreamKey, TenantId};

/// A serialized event as the storage backend sees it.
///
/// Produced by a [`Codec`](crate::Codec) at append time and never mutated
/// afterwards (backends may only stamp the authoritative `version`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub event_id: EventId,
    pub stream: StreamKey,
    /// 1-based position inside the stream; `None` for versionless streams.
    pub version: Option<u64>,
    /// Registered event name (see [`EventRegistry`](crate::EventRegistry)).
    pub name: String,
    pub payload: JsonValue,
    pub context: Map<String, JsonValue>,
    pub created_at: DateTime<Utc>,
}

impl RawEvent {
    pub fn tenant(&self) -> &TenantId {
        self.stream.tenant()
    }
}

/// An event as delivered by subscriptions: the raw record plus its global position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recorded {
    pub event: RawEvent,
    pub position: Position,
    pub tenant: TenantId,
}

impl Recorded {
    pub fn new(event: RawEvent, position: Position) -> Self {
        let tenant = event.tenant().clone();
        Self {
            event,
            position,
            tenant,
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn event(&self) -> &RawEvent {
        &self.event
    }

    pub fn into_event(self) -> RawEvent {
        self.event
    }
}
