//! Benchmarks the Response Cache's memory-tier hit path and put path
//! (spec.md §4.6 "Two-tier lookup").

use std::sync::Arc;

use agentmesh_core::cache::{CacheConfig, ResponseCache};
use agentmesh_core::ports::blob::InMemoryBlobStore;
use agentmesh_core::ports::clock::SystemClock;
use agentmesh_core::ports::{BlobStore, Clock};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    Runtime::new().expect("failed to build tokio runtime for benchmark")
}

fn cache() -> Arc<ResponseCache> {
    ResponseCache::new(
        CacheConfig::default(),
        Arc::new(InMemoryBlobStore::new()) as Arc<dyn BlobStore>,
        Arc::new(SystemClock) as Arc<dyn Clock>,
    )
}

fn bench_memory_hit(c: &mut Criterion) {
    let rt = runtime();
    let cache = cache();
    rt.block_on(cache.put("fp-bench".to_string(), "cached synthesis result".to_string()));

    c.bench_function("cache_get_memory_hit", |b| {
        b.to_async(&rt).iter(|| async { black_box(cache.get("fp-bench").await.unwrap()) });
    });
}

fn bench_miss(c: &mut Criterion) {
    let rt = runtime();
    let cache = cache();

    c.bench_function("cache_get_miss", |b| {
        b.to_async(&rt).iter(|| async { black_box(cache.get("never-written").await.unwrap()) });
    });
}

fn bench_put_under_eviction_pressure(c: &mut Criterion) {
    let rt = runtime();
    let cache = ResponseCache::new(
        CacheConfig { memory_capacity: 100, ..CacheConfig::default() },
        Arc::new(InMemoryBlobStore::new()) as Arc<dyn BlobStore>,
        Arc::new(SystemClock) as Arc<dyn Clock>,
    );
    let mut n: u64 = 0;

    c.bench_function("cache_put_at_capacity", |b| {
        b.to_async(&rt).iter(|| {
            n += 1;
            let key = format!("fp-{n}");
            let cache = Arc::clone(&cache);
            async move { cache.put(key, "value".to_string()).await }
        });
    });
}

criterion_group!(benches, bench_memory_hit, bench_miss, bench_put_under_eviction_pressure);
criterion_main!(benches);
