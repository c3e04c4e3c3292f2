//! Benchmarks for the cache store and signature normalisation.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use forgeflow::analysis::SignatureNormalizer;
use forgeflow::cache::{job_cache_key, CacheStore, InMemoryCacheStore};
use forgeflow::config::CacheConfig;

fn cache_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryCacheStore::new(&CacheConfig::default());
    let keys: Vec<String> = (0..1_000)
        .map(|i| job_cache_key("web", &format!("1.0.{i}")))
        .collect();
    runtime.block_on(async {
        for key in &keys {
            store.put(key, 4096).await;
        }
    });

    c.bench_function("cache_key", |b| {
        b.iter(|| job_cache_key(black_box("web"), black_box("1.4.2")));
    });

    c.bench_function("cache_lookup_hit", |b| {
        b.iter(|| runtime.block_on(store.lookup(black_box(&keys[500]))));
    });

    c.bench_function("cache_lookup_miss", |b| {
        b.iter(|| runtime.block_on(store.lookup(black_box("cache:missing"))));
    });
}

fn signature_benchmark(c: &mut Criterion) {
    let normalizer = SignatureNormalizer::new().unwrap();
    let message = "Step 'test' failed: job 3f2a9c1e-77b4-4c1d-9e0a-5b6c7d8e9f00 \
                   exceeded 30000ms at 0xdeadbeef";
    c.bench_function("normalize_failure", |b| {
        b.iter(|| normalizer.normalize(black_box(message)));
    });
}

criterion_group!(benches, cache_benchmark, signature_benchmark);
criterion_main!(benches);
