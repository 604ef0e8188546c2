//! Catch-up subscriptions over the global, position-ordered log.
//!
//! A [`Subscription`] is an endless iterator of batches. Each pull polls the
//! storage for records strictly after the last delivered [`Position`] until
//! either something arrives or the timebox elapses, in which case an empty
//! batch is yielded. The cursor lives only in the iterator: callers persist
//! [`Subscription::last_position`] themselves and resume from it later.

pub mod worker;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

use sourcebook_core::{Category, Position, TenantId};
use sourcebook_events::{Event, EventRegistry, Recorded};

use crate::config::StoreConfig;
use crate::event_store::{EventStoreError, StorageStrategy};

pub use worker::{SubscriptionWorker, WorkerHandle};

/// Shortest accepted timebox.
pub const MIN_TIMEBOX: Duration = Duration::from_secs(1);

/// Which records a subscription delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionFilter {
    /// Every record of every tenant.
    All,
    /// Records of streams in `category`, owned by `tenant`.
    Category { category: Category, tenant: TenantId },
    /// Records whose registered name is in the allow-list.
    Events(Vec<String>),
}

impl SubscriptionFilter {
    pub fn matches(&self, record: &Recorded) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::Category { category, tenant } => {
                record.tenant == *tenant && record.event.stream.category() == Some(category)
            }
            SubscriptionFilter::Events(names) => names.iter().any(|name| *name == record.event.name),
        }
    }
}

#[derive(Debug)]
pub struct Subscription<S> {
    storage: S,
    filter: SubscriptionFilter,
    last: Position,
    batch_size: usize,
    timebox: Duration,
    poll_interval: Duration,
}

impl<S: StorageStrategy> Subscription<S> {
    /// Validates parameters up front; nothing is read until the first pull.
    pub fn new(
        storage: S,
        filter: SubscriptionFilter,
        start: Position,
        batch_size: usize,
        timebox: Duration,
    ) -> Result<Self, EventStoreError> {
        if timebox < MIN_TIMEBOX {
            return Err(EventStoreError::misconfiguration(format!(
                "subscription timebox must be at least {MIN_TIMEBOX:?}, got {timebox:?}"
            )));
        }
        if batch_size == 0 {
            return Err(EventStoreError::misconfiguration("subscription batch size must be at least 1"));
        }
        if matches!(&filter, SubscriptionFilter::Events(names) if names.is_empty()) {
            return Err(EventStoreError::misconfiguration("event allow-list must not be empty"));
        }

        Ok(Self {
            storage,
            filter,
            last: start,
            batch_size,
            timebox,
            poll_interval: StoreConfig::default().subscription_poll_interval,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Last delivered position (or the start position before any delivery).
    pub fn last_position(&self) -> Position {
        self.last
    }

    pub fn filter(&self) -> &SubscriptionFilter {
        &self.filter
    }

    fn pull(&mut self) -> Result<Vec<Recorded>, EventStoreError> {
        // `None` when the timebox reaches past what `Instant` can represent.
        let deadline = Instant::now().checked_add(self.timebox);
        loop {
            let batch = self.storage.read_after(self.last, self.batch_size, &self.filter)?;
            if let Some(last) = batch.last() {
                self.last = last.position;
                return Ok(batch);
            }

            let pause = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        trace!(after = %self.last, "subscription window elapsed with no events");
                        return Ok(batch);
                    }
                    self.poll_interval.min(remaining)
                }
                None => self.poll_interval,
            };
            thread::sleep(pause);
        }
    }
}

impl<S: StorageStrategy> Iterator for Subscription<S> {
    type Item = Result<Vec<Recorded>, EventStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.pull())
    }
}

/// Configures a subscription; obtained from [`EventStore::subscriber`](crate::EventStore::subscriber).
///
/// Exactly one filter applies: selecting a category replaces an event
/// allow-list and vice versa; `to_events` / `to_event` extend an allow-list.
#[derive(Debug)]
pub struct SubscriptionBuilder<S> {
    storage: S,
    registry: Arc<EventRegistry>,
    tenant: TenantId,
    start: Position,
    filter: SubscriptionFilter,
    batch_size: usize,
    poll_interval: Duration,
}

impl<S> SubscriptionBuilder<S>
where
    S: StorageStrategy + Clone,
{
    pub(crate) fn new(
        storage: S,
        registry: Arc<EventRegistry>,
        tenant: TenantId,
        start: Position,
        config: &StoreConfig,
    ) -> Self {
        Self {
            storage,
            registry,
            tenant,
            start,
            filter: SubscriptionFilter::All,
            batch_size: config.subscription_batch_size,
            poll_interval: config.subscription_poll_interval,
        }
    }

    /// Records of streams in `category` for the builder's tenant.
    pub fn to_category(mut self, category: Category) -> Self {
        self.filter = SubscriptionFilter::Category {
            category,
            tenant: self.tenant.clone(),
        };
        self
    }

    pub fn to_events<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let mut allowed = match self.filter {
            SubscriptionFilter::Events(names) => names,
            _ => Vec::new(),
        };
        allowed.extend(names.into_iter().map(Into::into));
        self.filter = SubscriptionFilter::Events(allowed);
        self
    }

    /// Allow records of the registered event type `E`.
    pub fn to_event<E: Event>(self) -> Result<Self, EventStoreError> {
        let name = self.registry.name_of::<E>()?.to_string();
        Ok(self.to_events([name]))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Build the iterator; a timebox under one second is rejected here.
    pub fn build_iter(self, timebox: Duration) -> Result<Subscription<S>, EventStoreError> {
        let subscription = match self.filter {
            SubscriptionFilter::All => self.storage.subscribe_to_all(self.start, self.batch_size, timebox)?,
            SubscriptionFilter::Category { category, tenant } => {
                self.storage
                    .subscribe_to_category(self.start, self.batch_size, timebox, category, tenant)?
            }
            SubscriptionFilter::Events(names) => {
                self.storage
                    .subscribe_to_events(self.start, self.batch_size, timebox, names)?
            }
        };
        Ok(subscription.with_poll_interval(self.poll_interval))
    }
}
