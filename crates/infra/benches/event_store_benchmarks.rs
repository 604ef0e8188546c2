use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde::{Deserialize, Serialize};

use sourcebook_core::{ExpectedVersion, Position, StreamAddress, StreamId};
use sourcebook_events::EventEnvelope;
use sourcebook_infra::{EventStore, EventStoreBuilder, InMemoryStorage};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StockAdjusted {
    sku: String,
    delta: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StockLevel {
    quantity: i64,
}

fn store() -> EventStore<InMemoryStorage> {
    EventStoreBuilder::new(InMemoryStorage::new())
        .register_event::<StockAdjusted>("stock_adjusted")
        .register_event::<StockLevel>("stock_level")
        .build()
        .unwrap()
}

fn adjustments(count: usize) -> Vec<EventEnvelope<StockAdjusted>> {
    (0..count)
        .map(|i| {
            EventEnvelope::wrap(StockAdjusted {
                sku: "SKU-1".into(),
                delta: i as i64,
            })
        })
        .collect()
}

/// Store with one stream of `count` events.
fn seeded(count: usize) -> (EventStore<InMemoryStorage>, StreamId) {
    let store = store();
    let id = StreamId::new();
    for chunk in adjustments(count).chunks(500) {
        store.append(id, chunk.to_vec(), ExpectedVersion::Any).unwrap();
    }
    (store, id)
}

fn bench_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_throughput");

    for batch_size in [1, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(BenchmarkId::new("batch_append", batch_size), batch_size, |b, &size| {
            let store = store();
            let stream = StreamAddress::id(StreamId::new());

            b.iter(|| {
                black_box(
                    store
                        .append(stream.clone(), adjustments(size), ExpectedVersion::Any)
                        .unwrap(),
                );
            });
        });
    }

    group.finish();
}

fn bench_publish_with_outbox(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_with_outbox");
    group.throughput(Throughput::Elements(10));

    group.bench_function("publish_and_drain_10", |b| {
        let store = EventStoreBuilder::new(InMemoryStorage::new())
            .register_event::<StockAdjusted>("stock_adjusted")
            .with_outbox()
            .build()
            .unwrap();
        let outbox = store.outbox().unwrap();
        let stream = StreamAddress::id(StreamId::new());

        b.iter(|| {
            store.publish(stream.clone(), adjustments(10), ExpectedVersion::Any).unwrap();
            black_box(outbox.run_once(|_| Ok::<_, std::convert::Infallible>(())).unwrap());
        });
    });

    group.finish();
}

fn bench_replay_vs_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_vs_snapshot");

    for event_count in [100, 1000, 10_000].iter() {
        group.throughput(Throughput::Elements(*event_count as u64));

        group.bench_with_input(BenchmarkId::new("full_replay", event_count), event_count, |b, &count| {
            let (store, id) = seeded(count);
            b.iter(|| {
                let events = store.load_events::<StockAdjusted>(id, None, None).unwrap();
                black_box(events.iter().map(|e| e.payload().delta).sum::<i64>());
            });
        });

        group.bench_with_input(
            BenchmarkId::new("snapshot_fast_forward", event_count),
            event_count,
            |b, &count| {
                let (store, id) = seeded(count);
                let at = (count - 10) as u64;
                store
                    .save_snapshot(id, EventEnvelope::wrap(StockLevel { quantity: 0 }), at)
                    .unwrap();
                b.iter(|| black_box(store.load_stream(id, None, None).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_catch_up_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("catch_up_read");
    let (store, _) = seeded(10_000);

    for batch_size in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("read_all", batch_size), batch_size, |b, &size| {
            b.iter(|| {
                let mut sub = store
                    .subscriber(Position::ORIGIN)
                    .with_batch_size(size)
                    .build_iter(Duration::from_secs(1))
                    .unwrap();
                let mut seen = 0;
                while seen < 10_000 {
                    seen += sub.next().unwrap().unwrap().len();
                }
                black_box(seen);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_append_throughput,
    bench_publish_with_outbox,
    bench_replay_vs_snapshot,
    bench_catch_up_read
);
criterion_main!(benches);
