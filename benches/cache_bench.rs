//! Benchmarks for the cache read and write paths.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;

use tiered_cache::tier::codec::{Codec, JsonCodec};
use tiered_cache::tier::disk::encode_key;
use tiered_cache::{Cache, CacheTier};

fn bench_memory_hit(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let cache: Cache<String> = Cache::new("bench-memory", Some(tmp.path())).unwrap();
    for i in 0..1_000 {
        cache.set(&format!("key-{i}"), "x".repeat(256));
    }

    c.bench_function("get_memory_hit_1k", |b| {
        b.iter(|| {
            for i in (0..1_000).step_by(10) {
                black_box(cache.get(&format!("key-{i}")));
            }
        })
    });
}

fn bench_disk_hit(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let cache: Cache<String> = Cache::new("bench-disk", Some(tmp.path())).unwrap();
    cache.set("cold", "x".repeat(4096));

    c.bench_function("get_disk_hit_with_promotion_4kb", |b| {
        b.iter(|| {
            cache.memory_tier().remove("cold");
            black_box(cache.get("cold"));
        })
    });
}

fn bench_encoding(c: &mut Criterion) {
    let codec = JsonCodec::default();
    let value: Vec<u32> = (0..4_096).collect();

    c.bench_function("json_encode_4k_u32", |b| {
        b.iter(|| {
            let bytes = codec.encode(black_box(&value));
            black_box(bytes);
        })
    });

    c.bench_function("encode_key", |b| {
        b.iter(|| black_box(encode_key(black_box("https://example.com/images/a b.png"))))
    });
}

criterion_group!(benches, bench_memory_hit, bench_disk_hit, bench_encoding);
criterion_main!(benches);
