//! Store configuration and construction.

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use sourcebook_events::{
    Codec, Delivery, Event, EventEnvelope, EventRegistry, JsonCodec, RawEvent, RegistryError, Subscribers,
};

use crate::event_store::{EventStore, EventStoreError, StorageStrategy};
use crate::outbox::{OutboxFilter, no_filter};

pub const ENV_SUBSCRIPTION_BATCH_SIZE: &str = "SOURCEBOOK_SUBSCRIPTION_BATCH_SIZE";
pub const ENV_SUBSCRIPTION_POLL_INTERVAL_MS: &str = "SOURCEBOOK_SUBSCRIPTION_POLL_INTERVAL_MS";
pub const ENV_OUTBOX_BATCH_LIMIT: &str = "SOURCEBOOK_OUTBOX_BATCH_LIMIT";

/// Tunables shared by every tenant view of a store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum records per subscription batch.
    pub subscription_batch_size: usize,
    /// Sleep between polls while a subscription window is open.
    pub subscription_poll_interval: Duration,
    /// Entries drained per [`Outbox::run_once`](crate::outbox::Outbox::run_once).
    pub outbox_batch_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            subscription_batch_size: 100,
            subscription_poll_interval: Duration::from_millis(50),
            outbox_batch_limit: 100,
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by `SOURCEBOOK_*` environment variables.
    pub fn from_env() -> Result<Self, EventStoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EventStoreError> {
        fn parse(key: &str, value: Option<String>) -> Result<Option<u64>, EventStoreError> {
            value
                .map(|raw| {
                    raw.trim().parse::<u64>().map_err(|err| {
                        EventStoreError::misconfiguration(format!("{key}={raw:?} is not a valid number: {err}"))
                    })
                })
                .transpose()
        }

        let mut config = Self::default();
        if let Some(v) = parse(ENV_SUBSCRIPTION_BATCH_SIZE, lookup(ENV_SUBSCRIPTION_BATCH_SIZE))? {
            config.subscription_batch_size = v as usize;
        }
        if let Some(v) = parse(ENV_SUBSCRIPTION_POLL_INTERVAL_MS, lookup(ENV_SUBSCRIPTION_POLL_INTERVAL_MS))? {
            config.subscription_poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = parse(ENV_OUTBOX_BATCH_LIMIT, lookup(ENV_OUTBOX_BATCH_LIMIT))? {
            config.outbox_batch_limit = v as usize;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EventStoreError> {
        if self.subscription_batch_size == 0 {
            return Err(EventStoreError::misconfiguration("subscription_batch_size must be at least 1"));
        }
        if self.subscription_poll_interval.is_zero() {
            return Err(EventStoreError::misconfiguration("subscription_poll_interval must be positive"));
        }
        if self.outbox_batch_limit == 0 {
            return Err(EventStoreError::misconfiguration("outbox_batch_limit must be at least 1"));
        }
        Ok(())
    }

    pub fn with_subscription_batch_size(mut self, size: usize) -> Self {
        self.subscription_batch_size = size;
        self
    }

    pub fn with_subscription_poll_interval(mut self, interval: Duration) -> Self {
        self.subscription_poll_interval = interval;
        self
    }

    pub fn with_outbox_batch_limit(mut self, limit: usize) -> Self {
        self.outbox_batch_limit = limit;
        self
    }
}

/// Builds an [`EventStore`] bound to the default tenant.
///
/// Event types come either from a prebuilt registry
/// ([`with_event_registry`](Self::with_event_registry)) or from individual
/// [`register_event`](Self::register_event) calls; mixing both is a
/// misconfiguration reported by [`build`](Self::build).
pub struct EventStoreBuilder<S, C = JsonCodec> {
    storage: S,
    codec: C,
    config: StoreConfig,
    registry: Option<EventRegistry>,
    registrations: EventRegistry,
    registration_error: Option<RegistryError>,
    subscribers: Subscribers,
    outbox_filter: Option<OutboxFilter>,
}

impl<S: StorageStrategy> EventStoreBuilder<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            codec: JsonCodec,
            config: StoreConfig::default(),
            registry: None,
            registrations: EventRegistry::new(),
            registration_error: None,
            subscribers: Subscribers::new(),
            outbox_filter: None,
        }
    }
}

impl<S: StorageStrategy, C: Codec> EventStoreBuilder<S, C> {
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_event_registry(mut self, registry: EventRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn register_event<E: Event>(mut self, name: impl Into<String>) -> Self {
        if self.registration_error.is_none() {
            if let Err(err) = self.registrations.register::<E>(name) {
                self.registration_error = Some(err);
            }
        }
        self
    }

    pub fn with_codec<C2: Codec>(self, codec: C2) -> EventStoreBuilder<S, C2> {
        EventStoreBuilder {
            storage: self.storage,
            codec,
            config: self.config,
            registry: self.registry,
            registrations: self.registrations,
            registration_error: self.registration_error,
            subscribers: self.subscribers,
            outbox_filter: self.outbox_filter,
        }
    }

    pub fn subscribe<E, F>(mut self, handler: F) -> Self
    where
        E: Event,
        F: Fn(&EventEnvelope<E>) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(Delivery::Immediate, handler);
        self
    }

    /// Like [`subscribe`](Self::subscribe), but invoked only after the
    /// surrounding unit of work commits.
    pub fn subscribe_after_commit<E, F>(mut self, handler: F) -> Self
    where
        E: Event,
        F: Fn(&EventEnvelope<E>) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(Delivery::AfterCommit, handler);
        self
    }

    pub fn subscribe_all<F>(mut self, handler: F) -> Self
    where
        F: Fn(&RawEvent) + Send + Sync + 'static,
    {
        self.subscribers.subscribe_all(Delivery::Immediate, handler);
        self
    }

    pub fn subscribe_all_after_commit<F>(mut self, handler: F) -> Self
    where
        F: Fn(&RawEvent) + Send + Sync + 'static,
    {
        self.subscribers.subscribe_all(Delivery::AfterCommit, handler);
        self
    }

    /// Enqueue published events into the outbox, forwarding every entry.
    pub fn with_outbox(self) -> Self {
        self.with_outbox_filter(no_filter())
    }

    /// Enqueue published events; only entries accepted by `filter` are forwarded.
    pub fn with_outbox_filter(mut self, filter: OutboxFilter) -> Self {
        self.outbox_filter = Some(filter);
        self
    }

    pub fn without_outbox(mut self) -> Self {
        self.outbox_filter = None;
        self
    }

    pub fn build(self) -> Result<EventStore<S, C>, EventStoreError> {
        self.config.validate()?;
        if let Some(err) = self.registration_error {
            return Err(EventStoreError::misconfiguration(format!("invalid event registration: {err}")));
        }

        let registry = match self.registry {
            Some(_) if !self.registrations.is_empty() => {
                return Err(EventStoreError::misconfiguration(
                    "use either with_event_registry or register_event, not both",
                ));
            }
            Some(registry) => registry,
            None => self.registrations,
        };

        info!(
            registered_events = registry.len(),
            subscribers = self.subscribers.len(),
            outbox = self.outbox_filter.is_some(),
            "event store configured"
        );

        Ok(EventStore::from_parts(
            self.storage,
            self.codec,
            registry,
            self.subscribers,
            self.config,
            self.outbox_filter,
        ))
    }
}

impl<S, C> core::fmt::Debug for EventStoreBuilder<S, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventStoreBuilder")
            .field("config", &self.config)
            .field("prebuilt_registry", &self.registry.is_some())
            .field("registrations", &self.registrations.len())
            .field("outbox", &self.outbox_filter.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryStorage;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn env_overrides_defaults() {
        let config = StoreConfig::from_lookup(lookup(&[
            (ENV_SUBSCRIPTION_BATCH_SIZE, "10"),
            (ENV_SUBSCRIPTION_POLL_INTERVAL_MS, " 5 "),
        ]))
        .unwrap();

        assert_eq!(config.subscription_batch_size, 10);
        assert_eq!(config.subscription_poll_interval, Duration::from_millis(5));
        assert_eq!(config.outbox_batch_limit, StoreConfig::default().outbox_batch_limit);
    }

    #[test]
    fn bad_env_values_are_misconfiguration() {
        let err = StoreConfig::from_lookup(lookup(&[(ENV_OUTBOX_BATCH_LIMIT, "lots")])).unwrap_err();
        assert!(matches!(err, EventStoreError::Misconfiguration(_)));

        let err = StoreConfig::from_lookup(lookup(&[(ENV_SUBSCRIPTION_BATCH_SIZE, "0")])).unwrap_err();
        assert!(matches!(err, EventStoreError::Misconfiguration(_)));
    }

    #[test]
    fn registry_and_individual_registration_conflict() {
        let registry = EventRegistry::new().with::<u32>("count").unwrap();
        let err = EventStoreBuilder::new(InMemoryStorage::new())
            .with_event_registry(registry)
            .register_event::<String>("text")
            .build()
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Misconfiguration(_)));
    }

    #[test]
    fn duplicate_registration_fails_at_build() {
        let err = EventStoreBuilder::new(InMemoryStorage::new())
            .register_event::<u32>("count")
            .register_event::<String>("count")
            .build()
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Misconfiguration(msg) if msg.contains("count")));
    }

    #[test]
    fn invalid_config_fails_at_build() {
        let err = EventStoreBuilder::new(InMemoryStorage::new())
            .with_config(StoreConfig::default().with_outbox_batch_limit(0))
            .build()
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Misconfiguration(_)));
    }
}
