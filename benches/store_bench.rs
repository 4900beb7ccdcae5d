// benches/store_bench.rs

//! Benchmarks for the state store: upserts, point lookups, and prefix scans.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use drover::core::store::{StateStore, WatchSet};
use drover::core::types::NodePool;
use std::hint::black_box;
use std::sync::Arc;

fn seeded_store(count: usize) -> Arc<StateStore> {
    let store = StateStore::new().unwrap();
    let mut txn = store.write_blocking(2);
    for i in 0..count {
        txn.upsert_node_pool(NodePool::new(format!("pool-{i:05}")))
            .unwrap();
    }
    txn.commit();
    store
}

fn bench_upsert(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_upsert");
    for count in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let store = StateStore::new().unwrap();
                let mut txn = store.write_blocking(2);
                for i in 0..count {
                    txn.upsert_node_pool(NodePool::new(format!("pool-{i:05}")))
                        .unwrap();
                }
                txn.commit();
                black_box(store);
            });
        });
    }
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let store = seeded_store(10_000);
    let snap = store.snapshot();
    c.bench_function("store_point_lookup", |b| {
        b.iter(|| {
            let found = snap.node_pool_by_name(black_box("pool-04999")).unwrap();
            black_box(found);
        });
    });
}

fn bench_prefix_scan(c: &mut Criterion) {
    let store = seeded_store(10_000);
    let snap = store.snapshot();
    c.bench_function("store_prefix_scan_1k", |b| {
        b.iter(|| {
            let mut ws = WatchSet::new();
            let count = snap
                .node_pools_by_prefix(black_box("pool-04"), &mut ws)
                .unwrap()
                .count();
            black_box(count);
        });
    });
}

criterion_group!(benches, bench_upsert, bench_lookup, bench_prefix_scan);
criterion_main!(benches);
