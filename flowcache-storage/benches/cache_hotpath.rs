use criterion::{criterion_group, criterion_main, Criterion};
use flowcache_core::{codec, upstream_hashes, CacheConfig, FlowId, NodeId};
use flowcache_storage::FlowCache;
use serde_json::{json, Value};
use std::hint::black_box;

fn sample_rows(rows: usize) -> Value {
    let rows: Vec<Value> = (0..rows)
        .map(|i| json!({"id": i, "region": "emea", "revenue": i * 17, "active": i % 3 == 0}))
        .collect();
    json!({ "rows": rows })
}

fn bench_memory_tier(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build runtime");
    let cache = FlowCache::memory_only(CacheConfig::default()).expect("build cache");
    let flow = FlowId::new("bench-flow");
    let upstream = upstream_hashes([("source", "abc123"), ("filter", "def456")]);

    for i in 0..1_000 {
        let node = NodeId::new(format!("node-{i}"));
        cache.set(&flow, &node, "h1", upstream.clone(), sample_rows(10));
    }

    let node = NodeId::new("node-500");
    c.bench_function("cache/get_memory_hit", |b| {
        b.iter(|| {
            let value = runtime.block_on(cache.get(&flow, &node, black_box("h1"), &upstream));
            black_box(value);
        });
    });

    let payload = sample_rows(10);
    c.bench_function("cache/set_memory", |b| {
        b.iter(|| {
            cache.set(&flow, &node, "h1", upstream.clone(), black_box(payload.clone()));
        });
    });
}

fn bench_codec(c: &mut Criterion) {
    let serialized = codec::encode_value(&sample_rows(500)).expect("encode rows");
    let compressed = codec::compress(&serialized).expect("compress rows");

    c.bench_function("codec/compress_500_rows", |b| {
        b.iter(|| black_box(codec::compress(black_box(&serialized)).expect("compress rows")));
    });

    c.bench_function("codec/unpack_500_rows", |b| {
        b.iter(|| black_box(codec::unpack(black_box(&compressed)).expect("unpack rows")));
    });
}

criterion_group!(benches, bench_memory_tier, bench_codec);
criterion_main!(benches);
