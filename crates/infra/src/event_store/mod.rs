//! Event store engine.
//!
//! [`EventStore`] orchestrates append/load/delete on top of an injected
//! [`StorageStrategy`]: it resolves stream addresses against its tenant, asks
//! the versioning controller for version assignments, serializes through the
//! [`Codec`], and dispatches in-process subscribers after a publish.
//!
//! The storage re-runs the versioning check under its own guard; the engine's
//! pre-check only exists so serialization sees the versions that will be
//! assigned in the uncontended case.

pub mod in_memory;
pub mod snapshot;
pub mod r#trait;

use std::sync::Arc;

use tracing::{debug, field, instrument, warn};

use sourcebook_core::{ExpectedVersion, Position, StreamAddress, StreamKey, TenantId, Versioning};
use sourcebook_events::{Codec, Event, EventEnvelope, EventRegistry, JsonCodec, RawEvent, Recorded, Subscribers};

use crate::config::StoreConfig;
use crate::outbox::{Outbox, OutboxFilter, OutboxStorage};
use crate::subscription::SubscriptionBuilder;

pub use in_memory::InMemoryStorage;
pub use r#trait::{AppendMode, EventStoreError, Result, StorageStrategy, TransactionalStorage};
pub use snapshot::{IdentityMapping, OffsetMapping, StreamRevisionMapping};

/// Tenant-scoped view of an event store.
///
/// Cheap to clone; [`scoped_for_tenant`](Self::scoped_for_tenant) returns a new
/// value and never changes the original. Build one with
/// [`EventStoreBuilder`](crate::config::EventStoreBuilder).
pub struct EventStore<S, C = JsonCodec> {
    storage: S,
    codec: Arc<C>,
    registry: Arc<EventRegistry>,
    subscribers: Arc<Subscribers>,
    tenant: TenantId,
    config: StoreConfig,
    outbox_filter: Option<OutboxFilter>,
}

impl<S: Clone, C> Clone for EventStore<S, C> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            codec: Arc::clone(&self.codec),
            registry: Arc::clone(&self.registry),
            subscribers: Arc::clone(&self.subscribers),
            tenant: self.tenant.clone(),
            config: self.config.clone(),
            outbox_filter: self.outbox_filter.clone(),
        }
    }
}

impl<S, C> core::fmt::Debug for EventStore<S, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventStore")
            .field("tenant", &self.tenant)
            .field("registered_events", &self.registry.len())
            .field("subscribers", &self.subscribers)
            .field("outbox", &self.outbox_filter.is_some())
            .finish_non_exhaustive()
    }
}

impl<S, C> EventStore<S, C>
where
    S: StorageStrategy,
    C: Codec,
{
    pub(crate) fn from_parts(
        storage: S,
        codec: C,
        registry: EventRegistry,
        subscribers: Subscribers,
        config: StoreConfig,
        outbox_filter: Option<OutboxFilter>,
    ) -> Self {
        Self {
            storage,
            codec: Arc::new(codec),
            registry: Arc::new(registry),
            subscribers: Arc::new(subscribers),
            tenant: TenantId::default(),
            config,
            outbox_filter,
        }
    }

    /// Same store, bound to `tenant`.
    pub fn scoped_for_tenant(&self, tenant: TenantId) -> Self
    where
        S: Clone,
    {
        Self {
            tenant,
            ..self.clone()
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Resolve `address` to the canonical key for this store's tenant.
    pub fn stream_key(&self, address: impl Into<StreamAddress>) -> Result<StreamKey> {
        Ok(address.into().resolve(&self.tenant)?)
    }

    /// Append events to a stream.
    #[instrument(
        name = "event_store.append",
        skip_all,
        fields(tenant = %self.tenant, stream_id = field::Empty, event_count = events.len(), expected_version = ?expected)
    )]
    pub fn append<E: Event>(
        &self,
        address: impl Into<StreamAddress>,
        events: Vec<EventEnvelope<E>>,
        expected: ExpectedVersion,
    ) -> Result<Vec<Recorded>> {
        self.write(address.into(), &events, expected, AppendMode::Append)
    }

    /// Append events, enqueue them into the outbox (when enabled) in the same
    /// atomic unit, then invoke in-process subscribers.
    #[instrument(
        name = "event_store.publish",
        skip_all,
        fields(tenant = %self.tenant, stream_id = field::Empty, event_count = events.len(), expected_version = ?expected)
    )]
    pub fn publish<E: Event>(
        &self,
        address: impl Into<StreamAddress>,
        events: Vec<EventEnvelope<E>>,
        expected: ExpectedVersion,
    ) -> Result<Vec<Recorded>> {
        let mode = if self.outbox_filter.is_some() {
            AppendMode::Publish
        } else {
            AppendMode::Append
        };
        let recorded = self.write(address.into(), &events, expected, mode)?;

        for (envelope, record) in events.into_iter().zip(&recorded) {
            let envelope = envelope.with_version(record.event.version);
            let invoked = self
                .subscribers
                .dispatch(&envelope, &record.event, |callback| self.storage.run_after_commit(callback))?;
            debug!(event_id = %record.event.event_id, subscribers = invoked, "dispatched");
        }
        Ok(recorded)
    }

    fn write<E: Event>(
        &self,
        address: StreamAddress,
        events: &[EventEnvelope<E>],
        expected: ExpectedVersion,
        mode: AppendMode,
    ) -> Result<Vec<Recorded>> {
        let versioning = Versioning::build(expected, events.len())?;
        let key = address.resolve(&self.tenant)?;
        tracing::Span::current().record("stream_id", field::display(key.id()));

        let state = self.storage.stream_state(&key)?;
        let versions = versioning.versions(state).inspect_err(|err| {
            warn!(stream = %key, state = ?state, error = %err, "append rejected");
        })?;
        debug!(stream = %key, ?versions, "versions assigned");

        let name = self.registry.name_of::<E>()?;
        let raw = events
            .iter()
            .zip(versions)
            .map(|(envelope, version)| self.codec.serialize(envelope, &key, name, version))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.storage
            .insert_events(&key, &versioning, raw, mode)
            .inspect_err(|err| {
                if err.is_conflict() {
                    warn!(stream = %key, error = %err, "concurrent append lost the race");
                }
            })
    }

    /// Load a stream in version order.
    ///
    /// Without `start`, the newest snapshot below `stop` (if any) is
    /// returned first, followed by the events after its version. `start` is
    /// inclusive and `stop` exclusive. A missing stream yields an empty list.
    #[instrument(name = "event_store.load_stream", skip_all, fields(tenant = %self.tenant, stream_id = field::Empty, start = ?start, stop = ?stop))]
    pub fn load_stream(
        &self,
        address: impl Into<StreamAddress>,
        start: Option<u64>,
        stop: Option<u64>,
    ) -> Result<Vec<RawEvent>> {
        let key = self.stream_key(address)?;
        tracing::Span::current().record("stream_id", field::display(key.id()));

        if start.is_none() {
            if let Some(snapshot) = self.storage.latest_snapshot(&key, stop)? {
                if let Some(version) = snapshot.version {
                    debug!(stream = %key, snapshot_version = version, "fast-forwarding from snapshot");
                    let mut events = vec![snapshot];
                    events.extend(self.storage.fetch_events(&key, Some(version + 1), stop)?);
                    return Ok(events);
                }
            }
        }

        self.storage.fetch_events(&key, start, stop)
    }

    /// [`load_stream`](Self::load_stream), decoded into `E`.
    ///
    /// Every record (snapshot included) must be registered as `E`.
    pub fn load_events<E: Event>(
        &self,
        address: impl Into<StreamAddress>,
        start: Option<u64>,
        stop: Option<u64>,
    ) -> Result<Vec<EventEnvelope<E>>> {
        self.load_stream(address, start, stop)?
            .iter()
            .map(|raw| self.decode(raw))
            .collect()
    }

    pub fn decode<E: Event>(&self, raw: &RawEvent) -> Result<EventEnvelope<E>> {
        self.registry.ensure_type::<E>(&raw.name)?;
        Ok(self.codec.deserialize(raw)?)
    }

    /// Persist `snapshot` as the summary of the stream up to `version`.
    #[instrument(name = "event_store.save_snapshot", skip_all, fields(tenant = %self.tenant, stream_id = field::Empty, version = version))]
    pub fn save_snapshot<E: Event>(
        &self,
        address: impl Into<StreamAddress>,
        snapshot: EventEnvelope<E>,
        version: u64,
    ) -> Result<()> {
        let key = self.stream_key(address)?;
        tracing::Span::current().record("stream_id", field::display(key.id()));

        let name = self.registry.name_of::<E>()?;
        let raw = self.codec.serialize(&snapshot, &key, name, Some(version))?;
        self.storage.save_snapshot(raw)
    }

    /// Remove every event and snapshot of the stream; absent streams are a no-op.
    #[instrument(name = "event_store.delete_stream", skip_all, fields(tenant = %self.tenant, stream_id = field::Empty))]
    pub fn delete_stream(&self, address: impl Into<StreamAddress>) -> Result<()> {
        let key = self.stream_key(address)?;
        tracing::Span::current().record("stream_id", field::display(key.id()));
        self.storage.delete_stream(&key)
    }

    pub fn current_position(&self) -> Result<Option<Position>> {
        self.storage.current_position()
    }

    /// Start configuring a catch-up subscription delivering records strictly after `start`.
    pub fn subscriber(&self, start: Position) -> SubscriptionBuilder<S>
    where
        S: Clone,
    {
        SubscriptionBuilder::new(
            self.storage.clone(),
            Arc::clone(&self.registry),
            self.tenant.clone(),
            start,
            &self.config,
        )
    }

    /// Outbox drainer, when the store was built with an outbox.
    pub fn outbox(&self) -> Option<Outbox<S>>
    where
        S: OutboxStorage + Clone,
    {
        let filter = self.outbox_filter.clone()?;
        Some(
            Outbox::new(self.storage.clone())
                .with_filter(filter)
                .with_batch_limit(self.config.outbox_batch_limit),
        )
    }

    /// Run `f` in one unit of work of the storage.
    ///
    /// Everything `f` writes through the store it receives commits together;
    /// after-commit subscribers fire only once that commit succeeded.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        S: TransactionalStorage + Clone,
        F: FnOnce(&Self) -> Result<T>,
    {
        self.storage.transaction(|storage| {
            let scoped = Self {
                storage: storage.clone(),
                ..self.clone()
            };
            f(&scoped)
        })
    }
}
