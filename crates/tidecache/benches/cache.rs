use std::num::NonZeroUsize;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tidecache::EventStore;
use tidestore::{Event, EventBatch, KeyValue};

fn store(capacity: usize) -> EventStore {
    EventStore::new(NonZeroUsize::new(capacity).unwrap())
}

fn batch() -> EventBatch {
    (0..8)
        .map(|i| Event::put(KeyValue::new(format!("key-{i}"), vec![b'x'; 128])))
        .collect::<Vec<_>>()
        .into()
}

fn keys(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("/watch/{i}")).collect()
}

fn bench_cached_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_lookup");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("lookup_hit", |b| {
        let store = store(1000);
        let keys = keys(100);
        let events = batch();
        for key in &keys {
            store.store_events(key, events.clone());
        }

        let mut counter = 0;
        b.iter(|| {
            black_box(store.lookup_cached_events(&keys[counter % 100]));
            counter += 1;
        });
    });

    group.finish();
}

fn bench_mixed_50_50(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("50_lookup_50_store", |b| {
        let store = store(1000);
        let keys = keys(100);
        let events = batch();
        for key in &keys {
            store.store_events(key, events.clone());
        }

        let mut counter = 0usize;
        b.iter(|| {
            let key = &keys[counter % 100];
            if counter % 2 == 0 {
                black_box(store.lookup_cached_events(key));
            } else {
                store.store_events(key, events.clone());
            }
            counter += 1;
        });
    });

    group.finish();
}

fn bench_store_with_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("eviction");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("store_evicting", |b| {
        let store = store(10); // Small cache
        let keys = keys(100);
        let events = batch();

        let mut counter = 0;
        b.iter(|| {
            // Cycling through more keys than capacity evicts on every store
            store.store_events(&keys[counter % 100], events.clone());
            counter += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_cached_lookup,
    bench_mixed_50_50,
    bench_store_with_eviction
);
criterion_main!(benches);
