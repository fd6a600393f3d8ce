//! Benchmarks for nonce allocation and node selection
//!
//! Benchmarks:
//! - Counter increment and rollback
//! - Serialized allocation, uncontended and under contention
//! - Ring lookup per session

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ethers::types::Address;
use evm_committer::nonce_manager::NonceCache;
use evm_committer::rpc_manager::HashRing;
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn bench_incr_decr(c: &mut Criterion) {
    let cache = NonceCache::new();
    let account = Address::repeat_byte(0x11);

    c.bench_function("nonce_incr_decr", |b| {
        b.iter(|| {
            let n = cache.incr(black_box(account));
            cache.decr(account);
            black_box(n)
        });
    });
}

fn bench_serialized_allocation(c: &mut Criterion) {
    let rt = runtime();
    let cache = NonceCache::new();
    let account = Address::repeat_byte(0x22);

    c.bench_function("nonce_serialized_allocation", |b| {
        b.to_async(&rt).iter(|| async {
            cache
                .serialize(account, || async { Ok::<_, ()>(cache.incr(account)) })
                .await
        });
    });
}

fn bench_contended_allocation(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("nonce_contended_allocation");

    for concurrency in [1usize, 4, 16, 64].iter() {
        let cache = Arc::new(NonceCache::new());
        let account = Address::repeat_byte(0x33);

        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            concurrency,
            |b, &concurrency| {
                b.to_async(&rt).iter(|| {
                    let cache = Arc::clone(&cache);
                    async move {
                        let handles: Vec<_> = (0..concurrency)
                            .map(|_| {
                                let cache = Arc::clone(&cache);
                                tokio::spawn(async move {
                                    cache
                                        .serialize(account, || async {
                                            Ok::<_, ()>(cache.incr(account))
                                        })
                                        .await
                                })
                            })
                            .collect();
                        for handle in handles {
                            let _ = handle.await;
                        }
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_ring_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_lookup");

    for nodes in [2usize, 8, 32].iter() {
        let ring = HashRing::new((0..*nodes).map(|i| format!("http://node-{}:8545", i)));
        group.bench_with_input(BenchmarkId::from_parameter(nodes), &ring, |b, ring| {
            b.iter(|| ring.get_node(black_box("8f14e45f-ceea-467e-9a36-dedd4bea2543")));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_incr_decr,
    bench_serialized_allocation,
    bench_contended_allocation,
    bench_ring_lookup
);
criterion_main!(benches);
