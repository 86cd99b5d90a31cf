//! Benchmarks for cache lookup latency
//!
//! This benchmark measures:
//! - Key derivation
//! - Single hit/miss lookups against the in-process store
//! - Concurrent batch lookups of 50 queries

use ai_lib_cache::cache::CacheKeyGenerator;
use ai_lib_cache::{CacheManager, CacheSettings, WarmEntry};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use tokio::runtime::Runtime;

const PROVIDER: &str = "openai";

fn queries(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("how do I rotate the credentials of server {i}?"))
        .collect()
}

fn warmed_manager(rt: &Runtime, n: usize) -> CacheManager {
    let manager = CacheManager::new(CacheSettings::new().with_max_cache_size(n * 2))
        .expect("default settings are valid");
    let seed = queries(n)
        .into_iter()
        .map(|q| WarmEntry::new(q, json!({"answer": "use the vault"}), 0.9))
        .collect();
    rt.block_on(manager.warm_cache(seed, PROVIDER));
    manager
}

fn bench_key_generation(c: &mut Criterion) {
    let keys = CacheKeyGenerator::new();
    let query = "explain the difference between TCP and UDP in two sentences";

    let mut group = c.benchmark_group("key_generation");
    group.throughput(Throughput::Bytes(query.len() as u64));
    group.bench_function("sha256_key", |b| {
        b.iter(|| keys.generate(black_box(PROVIDER), black_box(query)))
    });
    group.finish();
}

fn bench_single_lookup(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let manager = warmed_manager(&rt, 100);
    let hit = queries(1).remove(0);

    let mut group = c.benchmark_group("single_lookup");
    group.bench_function("hit", |b| {
        b.to_async(&rt)
            .iter(|| manager.get_cached_response(black_box(&hit), PROVIDER))
    });
    group.bench_function("miss", |b| {
        b.to_async(&rt)
            .iter(|| manager.get_cached_response(black_box("never cached"), PROVIDER))
    });
    group.finish();
}

fn bench_batch_lookup(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let manager = warmed_manager(&rt, 200);

    let mut group = c.benchmark_group("batch_lookup");
    for size in [10usize, 50] {
        let batch = queries(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &batch, |b, batch| {
            b.to_async(&rt)
                .iter(|| manager.get_batch_cached(black_box(batch), PROVIDER))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_key_generation,
    bench_single_lookup,
    bench_batch_lookup,
);
criterion_main!(benches);
