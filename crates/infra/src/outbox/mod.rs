//! Transactional outbox.
//!
//! `publish` writes outbox entries in the same atomic unit as the events. The
//! [`Outbox`] drains them in insertion order as scoped [`OutboxEntry`] handles:
//! an entry is only removed once its handle is acknowledged. A handle dropped
//! without [`ack`](OutboxEntry::ack) goes back to the queue, which makes delivery
//! at-least-once.

use std::sync::Arc;

use tracing::{debug, warn};

use sourcebook_events::RawEvent;

use crate::event_store::{EventStoreError, Result};

pub type OutboxId = u64;

/// Predicate deciding which entries are forwarded.
pub type OutboxFilter = Arc<dyn Fn(&RawEvent) -> bool + Send + Sync>;

/// Filter accepting every entry.
pub fn no_filter() -> OutboxFilter {
    Arc::new(|_| true)
}

/// An entry claimed from outbox storage.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedEntry {
    pub id: OutboxId,
    pub event: RawEvent,
    /// Times this entry was handed out before and released unacknowledged.
    pub attempts: u32,
}

/// Outbox storage capability.
///
/// Claimed entries are hidden from other drainers until acknowledged (removed)
/// or released (re-queued), so concurrent drainers never receive the same
/// entry at the same time.
pub trait OutboxStorage: Send + Sync {
    /// Claim up to `limit` unclaimed entries in insertion order.
    fn outbox_entries(&self, limit: usize) -> Result<Vec<ClaimedEntry>>;

    fn acknowledge(&self, id: OutboxId) -> Result<()>;

    fn release(&self, id: OutboxId) -> Result<()>;
}

/// Outcome of one [`Outbox::run_once`] pass.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub forwarded: usize,
    pub failed: usize,
}

pub struct Outbox<S> {
    storage: S,
    filter: OutboxFilter,
    batch_limit: usize,
}

impl<S: OutboxStorage> Outbox<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            filter: no_filter(),
            batch_limit: crate::config::StoreConfig::default().outbox_batch_limit,
        }
    }

    pub fn with_filter(mut self, filter: OutboxFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit;
        self
    }

    /// Up to `limit` pending entries accepted by the filter, in insertion order.
    ///
    /// Entries the filter rejects are acknowledged on the spot and never yielded.
    pub fn entries(&self, limit: usize) -> Result<Vec<OutboxEntry<'_, S>>> {
        if limit == 0 {
            return Err(EventStoreError::misconfiguration("outbox batch limit must be at least 1"));
        }

        let mut accepted = Vec::with_capacity(limit);
        while accepted.len() < limit {
            let wanted = limit - accepted.len();
            let claimed = self.storage.outbox_entries(wanted)?;
            let exhausted = claimed.len() < wanted;

            for entry in claimed {
                let handle = OutboxEntry {
                    storage: &self.storage,
                    entry,
                    acked: false,
                };
                if (self.filter)(handle.event()) {
                    accepted.push(handle);
                } else {
                    debug!(event_id = %handle.event().event_id, name = %handle.event().name, "outbox entry filtered out");
                    handle.ack()?;
                }
            }

            if exhausted {
                break;
            }
        }
        Ok(accepted)
    }

    /// Drain one batch into `sink`, acknowledging what it accepts.
    ///
    /// Entries the sink fails on stay queued for the next pass.
    pub fn run_once<F, E>(&self, mut sink: F) -> Result<DrainReport>
    where
        F: FnMut(&RawEvent) -> Result<(), E>,
        E: core::fmt::Display,
    {
        let mut report = DrainReport::default();
        for entry in self.entries(self.batch_limit)? {
            match sink(entry.event()) {
                Ok(()) => {
                    debug!(event_id = %entry.event().event_id, name = %entry.event().name, "outbox entry forwarded");
                    entry.ack()?;
                    report.forwarded += 1;
                }
                Err(err) => {
                    warn!(
                        event_id = %entry.event().event_id,
                        attempts = entry.attempts(),
                        error = %err,
                        "outbox sink failed; entry stays queued"
                    );
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

impl<S> core::fmt::Debug for Outbox<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Outbox")
            .field("batch_limit", &self.batch_limit)
            .finish_non_exhaustive()
    }
}

/// Scoped handle to one pending outbox entry.
///
/// Call [`ack`](Self::ack) once the event was forwarded; dropping the handle
/// instead returns the entry to the queue.
#[must_use = "an outbox entry is re-queued unless acknowledged"]
pub struct OutboxEntry<'a, S: OutboxStorage> {
    storage: &'a S,
    entry: ClaimedEntry,
    acked: bool,
}

impl<S: OutboxStorage> OutboxEntry<'_, S> {
    pub fn event(&self) -> &RawEvent {
        &self.entry.event
    }

    pub fn id(&self) -> OutboxId {
        self.entry.id
    }

    pub fn attempts(&self) -> u32 {
        self.entry.attempts
    }

    pub fn ack(mut self) -> Result<()> {
        self.storage.acknowledge(self.entry.id)?;
        self.acked = true;
        Ok(())
    }
}

impl<S: OutboxStorage> Drop for OutboxEntry<'_, S> {
    fn drop(&mut self) {
        if self.acked {
            return;
        }
        if let Err(err) = self.storage.release(self.entry.id) {
            warn!(outbox_id = self.entry.id, error = %err, "failed to release outbox entry");
        }
    }
}

impl<S: OutboxStorage> core::fmt::Debug for OutboxEntry<'_, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OutboxEntry")
            .field("id", &self.entry.id)
            .field("name", &self.entry.event.name)
            .field("attempts", &self.entry.attempts)
            .finish()
    }
}
