use std::time::Duration;

use thiserror::Error;

use sourcebook_core::{CoreError, Position, StreamKey, StreamState, Versioning};
use sourcebook_events::{Callback, CodecError, RawEvent, Recorded};

use crate::subscription::{Subscription, SubscriptionFilter};

/// Event store operation error.
///
/// These are the errors a caller of the engine sees. They fall into four classes:
///
/// - **Core**: deterministic decision failures (empty batch, bad stream address,
///   versioning misuse, concurrency conflict)
/// - **Codec**: the serialization capability could not map an event
/// - **Misconfiguration**: invalid construction parameters (never retried)
/// - **Storage**: the backend failed; surfaced as-is, never retried by the core
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("misconfiguration: {0}")]
    Misconfiguration(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl EventStoreError {
    pub fn misconfiguration(msg: impl Into<String>) -> Self {
        Self::Misconfiguration(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Core(err) if err.is_conflict())
    }

    pub fn is_storage_fault(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Only conflicts can succeed on a retry (after reloading the stream).
    pub fn is_retryable(&self) -> bool {
        self.is_conflict()
    }
}

pub type Result<T, E = EventStoreError> = std::result::Result<T, E>;

/// Whether an insert also enqueues its events into the outbox.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AppendMode {
    Append,
    Publish,
}

/// Storage capability consumed by the engine.
///
/// Implementations must:
/// - run the versioning check and record the next stream state atomically with
///   the insert (two appenders never both observe the same current version)
/// - stamp the versions the [`Versioning`] assigns under that same guard
/// - assign strictly increasing global [`Position`]s at insert time
/// - write outbox entries in the same atomic unit when `mode` is [`AppendMode::Publish`]
/// - treat a missing stream as empty on read and as a no-op on delete
/// - fix a stream's category on its first insert and reject inserts naming a
///   different one
pub trait StorageStrategy: Send + Sync {
    /// Events of a stream in order; `start` inclusive, `stop` exclusive, both
    /// counted as 1-based positions inside the stream (the version, for
    /// versioned streams).
    fn fetch_events(&self, key: &StreamKey, start: Option<u64>, stop: Option<u64>) -> Result<Vec<RawEvent>>;

    fn stream_state(&self, key: &StreamKey) -> Result<StreamState>;

    fn insert_events(
        &self,
        key: &StreamKey,
        versioning: &Versioning,
        events: Vec<RawEvent>,
        mode: AppendMode,
    ) -> Result<Vec<Recorded>>;

    /// Persist a snapshot; `snapshot.version` is the last version it summarizes.
    fn save_snapshot(&self, snapshot: RawEvent) -> Result<()>;

    /// Newest snapshot of the stream whose version is below `before` (any
    /// version when `None`), with `version` set.
    fn latest_snapshot(&self, key: &StreamKey, before: Option<u64>) -> Result<Option<RawEvent>>;

    fn delete_stream(&self, key: &StreamKey) -> Result<()>;

    /// Up to `limit` records with a position strictly after `after`, in position order.
    fn read_after(&self, after: Position, limit: usize, filter: &SubscriptionFilter) -> Result<Vec<Recorded>>;

    /// Last position assigned by this backend, if any event was ever written.
    fn current_position(&self) -> Result<Option<Position>>;

    /// Schedule `callback` for after the surrounding unit of work commits.
    /// Outside a unit of work every write is already committed, so it runs now.
    fn run_after_commit(&self, callback: Callback) -> Result<()>;

    fn subscribe_to_all(&self, start: Position, batch_size: usize, timebox: Duration) -> Result<Subscription<Self>>
    where
        Self: Sized + Clone,
    {
        Subscription::new(self.clone(), SubscriptionFilter::All, start, batch_size, timebox)
    }

    fn subscribe_to_category(
        &self,
        start: Position,
        batch_size: usize,
        timebox: Duration,
        category: sourcebook_core::Category,
        tenant: sourcebook_core::TenantId,
    ) -> Result<Subscription<Self>>
    where
        Self: Sized + Clone,
    {
        let filter = SubscriptionFilter::Category { category, tenant };
        Subscription::new(self.clone(), filter, start, batch_size, timebox)
    }

    fn subscribe_to_events(
        &self,
        start: Position,
        batch_size: usize,
        timebox: Duration,
        names: Vec<String>,
    ) -> Result<Subscription<Self>>
    where
        Self: Sized + Clone,
    {
        Subscription::new(self.clone(), SubscriptionFilter::Events(names), start, batch_size, timebox)
    }
}

/// Backends that can group several engine calls into one atomic unit.
pub trait TransactionalStorage: StorageStrategy + Sized {
    /// Run `f` against a transactional view of the storage.
    ///
    /// Writes become visible together when `f` returns `Ok` and the commit
    /// succeeds; after-commit callbacks registered through the view run exactly
    /// once after that. On `Err` (from `f` or the commit) both are discarded.
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        let conflict = EventStoreError::from(CoreError::conflict(3, 2));
        assert!(conflict.is_conflict());
        assert!(conflict.is_retryable());
        assert!(!conflict.is_storage_fault());

        let misuse = EventStoreError::from(CoreError::NoEventsToAppend);
        assert!(!misuse.is_retryable());

        let storage = EventStoreError::storage("disk on fire");
        assert!(storage.is_storage_fault());
        assert!(!storage.is_retryable());
        assert_eq!(storage.to_string(), "storage failure: disk on fire");
    }
}
