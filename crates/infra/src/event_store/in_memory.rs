use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use sourcebook_core::{Category, CoreError, Position, StreamKey, StreamState, Versioning};
use sourcebook_events::{Callback, RawEvent, Recorded, UnitOfWork};

use super::snapshot::{OffsetMapping, StreamRevisionMapping};
use super::r#trait::{AppendMode, EventStoreError, Result, StorageStrategy, TransactionalStorage};
use crate::outbox::{ClaimedEntry, OutboxId, OutboxStorage};
use crate::subscription::SubscriptionFilter;

#[derive(Debug, Clone, Default)]
struct StreamRecord {
    state: StreamState,
    /// Fixed by the first append.
    category: Option<Category>,
    events: Vec<RawEvent>,
}

#[derive(Debug, Clone)]
struct OutboxRecord {
    id: OutboxId,
    event: RawEvent,
    claimed: bool,
    attempts: u32,
}

/// A stream mutation, applied directly or journaled by a transaction and
/// replayed against the shared state at commit.
#[derive(Debug, Clone)]
enum Mutation {
    Insert {
        key: StreamKey,
        versioning: Versioning,
        events: Vec<RawEvent>,
        mode: AppendMode,
    },
    Snapshot {
        key: StreamKey,
        offset: u64,
        snapshot: RawEvent,
    },
    Delete(StreamKey),
}

#[derive(Debug, Clone, Default)]
struct State {
    streams: HashMap<StreamKey, StreamRecord>,
    /// Global log, ordered by position.
    log: Vec<Recorded>,
    last_position: Option<Position>,
    /// Snapshot records keyed by backend offset, per stream.
    snapshots: HashMap<StreamKey, BTreeMap<u64, RawEvent>>,
    outbox: Vec<OutboxRecord>,
    next_outbox_id: OutboxId,
}

impl State {
    fn apply(&mut self, mutation: &Mutation) -> Result<Vec<Recorded>> {
        match mutation {
            Mutation::Insert {
                key,
                versioning,
                events,
                mode,
            } => self.insert(key, versioning, events, *mode),
            Mutation::Snapshot { key, offset, snapshot } => {
                self.snapshots
                    .entry(key.clone())
                    .or_default()
                    .insert(*offset, snapshot.clone());
                Ok(Vec::new())
            }
            Mutation::Delete(key) => {
                self.streams.remove(key);
                self.snapshots.remove(key);
                self.log.retain(|r| r.event.stream != *key);
                Ok(Vec::new())
            }
        }
    }

    fn insert(
        &mut self,
        key: &StreamKey,
        versioning: &Versioning,
        events: &[RawEvent],
        mode: AppendMode,
    ) -> Result<Vec<Recorded>> {
        let existing = self.streams.get(key);
        let current = existing.map(|s| s.state).unwrap_or_default();
        let versions = versioning.versions(current)?;
        let next_state = versioning.next_state(current)?;
        let category = stream_category(existing, key)?;
        let stream_key = key.clone().with_category(category.clone());

        let mut recorded = Vec::with_capacity(events.len());
        for (event, version) in events.iter().zip(versions) {
            let mut event = event.clone();
            event.version = version;
            event.stream = stream_key.clone();
            let position = self.last_position.unwrap_or(Position::ORIGIN).next();
            self.last_position = Some(position);

            if mode == AppendMode::Publish {
                self.next_outbox_id += 1;
                self.outbox.push(OutboxRecord {
                    id: self.next_outbox_id,
                    event: event.clone(),
                    claimed: false,
                    attempts: 0,
                });
            }
            recorded.push(Recorded::new(event, position));
        }

        let stream = self.streams.entry(key.clone()).or_default();
        stream.state = next_state;
        stream.category = category;
        stream.events.extend(recorded.iter().map(|r| r.event.clone()));
        self.log.extend(recorded.iter().cloned());

        debug!(stream = %stream_key, state = ?next_state, count = recorded.len(), "in-memory insert");
        Ok(recorded)
    }
}

/// Category for an append: an existing stream keeps the one it was created
/// with; an address naming a different category is rejected.
fn stream_category(existing: Option<&StreamRecord>, key: &StreamKey) -> Result<Option<Category>> {
    match (existing, key.category()) {
        (None, requested) => Ok(requested.cloned()),
        (Some(stream), None) => Ok(stream.category.clone()),
        (Some(stream), Some(requested)) if stream.category.as_ref() == Some(requested) => {
            Ok(Some(requested.clone()))
        }
        (Some(stream), Some(requested)) => {
            let existing = stream
                .category
                .as_ref()
                .map_or_else(|| "no category".to_string(), |c| format!("category '{c}'"));
            Err(CoreError::validation(format!(
                "stream {key} was created with {existing}, not category '{requested}'"
            ))
            .into())
        }
    }
}

#[derive(Debug, Default)]
struct Transaction {
    /// Private copy the closure reads and writes.
    state: RwLock<State>,
    journal: Mutex<Vec<Mutation>>,
    uow: Mutex<UnitOfWork>,
    closed: AtomicBool,
}

/// In-memory storage backend.
///
/// Intended for tests/dev. Clones share the same data. Positions are a 1-based
/// commit counter; snapshots are keyed through an [`OffsetMapping`]
/// ([`StreamRevisionMapping`] by default).
#[derive(Debug, Clone)]
pub struct InMemoryStorage {
    shared: Arc<RwLock<State>>,
    tx: Option<Arc<Transaction>>,
    mapping: Arc<dyn OffsetMapping>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self {
            shared: Arc::default(),
            tx: None,
            mapping: Arc::new(StreamRevisionMapping),
        }
    }
}

fn poisoned<T>(_: PoisonError<T>) -> EventStoreError {
    EventStoreError::storage("in-memory store lock poisoned")
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offset_mapping(mut self, mapping: impl OffsetMapping + 'static) -> Self {
        self.mapping = Arc::new(mapping);
        self
    }

    /// Whether this handle is a view inside a running transaction.
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Number of committed entries still in the outbox (claimed or not).
    pub fn outbox_len(&self) -> Result<usize> {
        Ok(self.shared.read().map_err(poisoned)?.outbox.len())
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> Result<T>) -> Result<T> {
        match &self.tx {
            Some(tx) => {
                tx.ensure_open()?;
                let state = tx.state.read().map_err(poisoned)?;
                f(&state)
            }
            None => {
                let state = self.shared.read().map_err(poisoned)?;
                f(&state)
            }
        }
    }

    fn write(&self, mutation: Mutation) -> Result<Vec<Recorded>> {
        match &self.tx {
            Some(tx) => {
                tx.ensure_open()?;
                let recorded = tx.state.write().map_err(poisoned)?.apply(&mutation)?;
                tx.journal.lock().map_err(poisoned)?.push(mutation);
                Ok(recorded)
            }
            None => self.shared.write().map_err(poisoned)?.apply(&mutation),
        }
    }

    /// Replay the journal against the current shared state. Every insert
    /// re-runs its versioning check there, so only the streams the
    /// transaction touched can make it fail.
    fn commit(&self, tx: &Transaction) -> Result<()> {
        let journal = std::mem::take(&mut *tx.journal.lock().map_err(poisoned)?);
        if journal.is_empty() {
            return Ok(());
        }

        let mut shared = self.shared.write().map_err(poisoned)?;
        let mut staged = shared.clone();
        for mutation in &journal {
            staged.apply(mutation)?;
        }
        *shared = staged;
        debug!(writes = journal.len(), "in-memory journal applied");
        Ok(())
    }
}

impl Transaction {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EventStoreError::storage("transaction already finished"));
        }
        Ok(())
    }

    fn take_unit_of_work(&self) -> UnitOfWork {
        std::mem::take(&mut *self.uow.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl StorageStrategy for InMemoryStorage {
    fn fetch_events(&self, key: &StreamKey, start: Option<u64>, stop: Option<u64>) -> Result<Vec<RawEvent>> {
        let from = start.unwrap_or(1).max(1);
        self.read(|state| {
            let Some(stream) = state.streams.get(key) else {
                return Ok(Vec::new());
            };
            Ok(stream
                .events
                .iter()
                .zip(1u64..)
                .filter(|(_, n)| *n >= from && stop.is_none_or(|stop| *n < stop))
                .map(|(event, _)| event.clone())
                .collect())
        })
    }

    fn stream_state(&self, key: &StreamKey) -> Result<StreamState> {
        self.read(|state| Ok(state.streams.get(key).map(|s| s.state).unwrap_or_default()))
    }

    fn insert_events(
        &self,
        key: &StreamKey,
        versioning: &Versioning,
        events: Vec<RawEvent>,
        mode: AppendMode,
    ) -> Result<Vec<Recorded>> {
        self.write(Mutation::Insert {
            key: key.clone(),
            versioning: *versioning,
            events,
            mode,
        })
    }

    fn save_snapshot(&self, mut snapshot: RawEvent) -> Result<()> {
        let version = snapshot
            .version
            .ok_or_else(|| CoreError::validation("snapshot must carry the version it summarizes"))?;
        let offset = self.mapping.to_offset(version)?;
        // Stored like an offset-addressed record; the version is restored on read.
        snapshot.version = None;
        let key = snapshot.stream.clone();
        self.write(Mutation::Snapshot { key, offset, snapshot })?;
        Ok(())
    }

    fn latest_snapshot(&self, key: &StreamKey, before: Option<u64>) -> Result<Option<RawEvent>> {
        let stored: Vec<(u64, RawEvent)> = self.read(|state| {
            Ok(state
                .snapshots
                .get(key)
                .map(|by_offset| by_offset.iter().rev().map(|(o, s)| (*o, s.clone())).collect())
                .unwrap_or_default())
        })?;

        for (offset, mut snapshot) in stored {
            let version = self.mapping.to_version(offset)?;
            if before.is_none_or(|before| version < before) {
                snapshot.version = Some(version);
                return Ok(Some(snapshot));
            }
        }
        Ok(None)
    }

    fn delete_stream(&self, key: &StreamKey) -> Result<()> {
        self.write(Mutation::Delete(key.clone()))?;
        Ok(())
    }

    fn read_after(&self, after: Position, limit: usize, filter: &SubscriptionFilter) -> Result<Vec<Recorded>> {
        self.read(|state| {
            let from = state.log.partition_point(|r| r.position <= after);
            Ok(state.log[from..]
                .iter()
                .filter(|r| filter.matches(r))
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn current_position(&self) -> Result<Option<Position>> {
        self.read(|state| Ok(state.last_position))
    }

    fn run_after_commit(&self, callback: Callback) -> Result<()> {
        match &self.tx {
            Some(tx) => {
                tx.ensure_open()?;
                tx.uow.lock().map_err(poisoned)?.on_commit(callback);
            }
            None => callback(),
        }
        Ok(())
    }
}

impl TransactionalStorage for InMemoryStorage {
    /// Optimistic: the closure works on a private copy of the data and its
    /// writes are journaled. At commit the journal is replayed against the
    /// shared data, re-checking each touched stream's expected version, so
    /// only a concurrent write to one of those streams fails the commit.
    /// Positions returned inside the closure are provisional. Outbox claims
    /// always act on committed entries. Nested calls join the outer
    /// transaction.
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        if self.tx.is_some() {
            return f(self);
        }

        let snapshot = self.shared.read().map_err(poisoned)?.clone();
        let tx = Arc::new(Transaction {
            state: RwLock::new(snapshot),
            ..Transaction::default()
        });
        let view = Self {
            shared: Arc::clone(&self.shared),
            tx: Some(Arc::clone(&tx)),
            mapping: Arc::clone(&self.mapping),
        };

        let outcome = f(&view).and_then(|value| self.commit(&tx).map(|()| value));
        tx.closed.store(true, Ordering::Release);
        let uow = tx.take_unit_of_work();

        match outcome {
            Ok(value) => {
                let ran = uow.commit();
                debug!(after_commit = ran, "in-memory transaction committed");
                Ok(value)
            }
            Err(err) => {
                let dropped = uow.rollback();
                debug!(discarded = dropped, error = %err, "in-memory transaction rolled back");
                Err(err)
            }
        }
    }
}

impl OutboxStorage for InMemoryStorage {
    fn outbox_entries(&self, limit: usize) -> Result<Vec<ClaimedEntry>> {
        let mut state = self.shared.write().map_err(poisoned)?;
        Ok(state
            .outbox
            .iter_mut()
            .filter(|record| !record.claimed)
            .take(limit)
            .map(|record| {
                record.claimed = true;
                ClaimedEntry {
                    id: record.id,
                    event: record.event.clone(),
                    attempts: record.attempts,
                }
            })
            .collect())
    }

    fn acknowledge(&self, id: OutboxId) -> Result<()> {
        let mut state = self.shared.write().map_err(poisoned)?;
        state.outbox.retain(|record| record.id != id);
        Ok(())
    }

    fn release(&self, id: OutboxId) -> Result<()> {
        let mut state = self.shared.write().map_err(poisoned)?;
        if let Some(record) = state.outbox.iter_mut().find(|record| record.id == id) {
            record.claimed = false;
            record.attempts += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{Map, json};
    use sourcebook_core::{EventId, ExpectedVersion, StreamAddress, TenantId};

    fn key(name: &str) -> StreamKey {
        StreamAddress::named(name).resolve(&TenantId::default()).unwrap()
    }

    fn raw(key: &StreamKey, n: u64) -> RawEvent {
        RawEvent {
            event_id: EventId::new(),
            stream: key.clone(),
            version: None,
            name: "tick".into(),
            payload: json!({ "n": n }),
            context: Map::new(),
            created_at: Utc::now(),
        }
    }

    fn insert(storage: &InMemoryStorage, key: &StreamKey, count: u64, mode: AppendMode) -> Result<Vec<Recorded>> {
        let versioning = Versioning::build(ExpectedVersion::Any, count as usize)?;
        let events = (1..=count).map(|n| raw(key, n)).collect();
        storage.insert_events(key, &versioning, events, mode)
    }

    #[test]
    fn insert_stamps_versions_and_positions() {
        let storage = InMemoryStorage::new();
        let a = key("a");
        let b = key("b");

        insert(&storage, &a, 2, AppendMode::Append).unwrap();
        let recorded = insert(&storage, &b, 1, AppendMode::Append).unwrap();

        assert_eq!(recorded[0].position, Position::new(3));
        assert_eq!(recorded[0].event.version, Some(1));
        assert_eq!(storage.stream_state(&a).unwrap(), StreamState::Versioned(2));
        assert_eq!(storage.current_position().unwrap(), Some(Position::new(3)));
    }

    #[test]
    fn fetch_respects_start_and_stop() {
        let storage = InMemoryStorage::new();
        let k = key("s");
        insert(&storage, &k, 5, AppendMode::Append).unwrap();

        let versions: Vec<_> = storage
            .fetch_events(&k, Some(2), Some(5))
            .unwrap()
            .into_iter()
            .map(|e| e.version)
            .collect();
        assert_eq!(versions, vec![Some(2), Some(3), Some(4)]);
        assert!(storage.fetch_events(&key("missing"), None, None).unwrap().is_empty());
    }

    #[test]
    fn snapshot_round_trips_through_offset_mapping() {
        let storage = InMemoryStorage::new();
        let k = key("snap");
        let mut snapshot = raw(&k, 0);
        snapshot.version = Some(5);
        storage.save_snapshot(snapshot).unwrap();

        let mut newer = raw(&k, 0);
        newer.version = Some(7);
        storage.save_snapshot(newer).unwrap();

        assert_eq!(storage.latest_snapshot(&k, None).unwrap().unwrap().version, Some(7));
        assert!(storage.save_snapshot(raw(&k, 0)).is_err());
    }

    #[test]
    fn latest_snapshot_honours_the_upper_bound() {
        let storage = InMemoryStorage::new();
        let k = key("bounded");
        for version in [3, 6] {
            let mut snapshot = raw(&k, 0);
            snapshot.version = Some(version);
            storage.save_snapshot(snapshot).unwrap();
        }

        let version_below = |before| storage.latest_snapshot(&k, Some(before)).unwrap().and_then(|s| s.version);
        assert_eq!(version_below(7), Some(6));
        assert_eq!(version_below(6), Some(3));
        assert_eq!(version_below(3), None);
    }

    #[test]
    fn failed_transaction_discards_writes_and_callbacks() {
        let storage = InMemoryStorage::new();
        let k = key("tx");
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        let result: Result<()> = storage.transaction(|view| {
            insert(view, &k, 1, AppendMode::Publish)?;
            view.run_after_commit(Box::new(move || flag.store(true, Ordering::SeqCst)))?;
            Err(EventStoreError::storage("abort"))
        });

        assert!(result.is_err());
        assert!(!ran.load(Ordering::SeqCst));
        assert!(storage.fetch_events(&k, None, None).unwrap().is_empty());
        assert_eq!(storage.outbox_len().unwrap(), 0);
    }

    #[test]
    fn commit_fails_when_a_touched_stream_moved() {
        let storage = InMemoryStorage::new();
        let k = key("race");

        let result = storage.transaction(|view| {
            let versioning = Versioning::build(ExpectedVersion::Exact(0), 1)?;
            view.insert_events(&k, &versioning, vec![raw(&k, 1)], AppendMode::Append)?;
            // A concurrent writer commits to the same stream first.
            insert(&storage, &k, 1, AppendMode::Append)?;
            Ok(())
        });

        let err = result.unwrap_err();
        assert!(matches!(
            err,
            EventStoreError::Core(CoreError::Concurrency { actual: 1, expected: 0 })
        ));
        assert_eq!(storage.fetch_events(&k, None, None).unwrap().len(), 1);
    }

    #[test]
    fn unrelated_writes_do_not_fail_a_transaction() {
        let storage = InMemoryStorage::new();
        let mine = key("mine");
        let other = key("other");
        insert(&storage, &other, 2, AppendMode::Publish).unwrap();

        let result = storage.transaction(|view| {
            let versioning = Versioning::build(ExpectedVersion::Exact(0), 1)?;
            view.insert_events(&mine, &versioning, vec![raw(&mine, 1)], AppendMode::Append)?;
            // Concurrent outbox drain and an append to another stream.
            let claimed = storage.outbox_entries(1)?;
            storage.acknowledge(claimed[0].id)?;
            insert(&storage, &other, 1, AppendMode::Append)?;
            Ok(())
        });

        result.unwrap();
        let events = storage.fetch_events(&mine, None, None).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(storage.current_position().unwrap(), Some(Position::new(4)));
        assert_eq!(storage.outbox_len().unwrap(), 1);
    }

    #[test]
    fn stream_keeps_the_category_it_was_created_with() {
        let storage = InMemoryStorage::new();
        let order = Category::new("order").unwrap();
        let plain = key("o1");
        let tagged = plain.clone().with_category(Some(order.clone()));

        insert(&storage, &tagged, 1, AppendMode::Append).unwrap();
        let later = insert(&storage, &plain, 1, AppendMode::Append).unwrap();
        assert_eq!(later[0].event.stream.category(), Some(&order));

        let invoice = plain.clone().with_category(Some(Category::new("invoice").unwrap()));
        let err = insert(&storage, &invoice, 1, AppendMode::Append).unwrap_err();
        assert!(matches!(err, EventStoreError::Core(CoreError::Validation(_))));

        let uncategorised = key("u1");
        insert(&storage, &uncategorised, 1, AppendMode::Append).unwrap();
        let retagged = uncategorised.with_category(Some(order));
        assert!(insert(&storage, &retagged, 1, AppendMode::Append).is_err());
    }

    #[test]
    fn views_are_unusable_after_the_transaction() {
        let storage = InMemoryStorage::new();
        let leaked = storage.transaction(|view| Ok(view.clone())).unwrap();
        assert!(leaked.current_position().unwrap_err().is_storage_fault());
    }

    #[test]
    fn outbox_claims_are_exclusive_until_released() {
        let storage = InMemoryStorage::new();
        insert(&storage, &key("o"), 3, AppendMode::Publish).unwrap();

        let first = storage.outbox_entries(2).unwrap();
        let second = storage.outbox_entries(2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);

        storage.release(first[0].id).unwrap();
        storage.acknowledge(first[1].id).unwrap();
        let again = storage.outbox_entries(10).unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, first[0].id);
        assert_eq!(again[0].attempts, 1);
    }
}
