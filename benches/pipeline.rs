//! Parse + dedup throughput on a mixed JSON-lines payload.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use logflow::dedup::DedupCache;
use logflow::event::{InputFormat, LogParser};
use logflow::storage::SqliteStore;
use std::sync::Arc;

fn payload(n: usize) -> String {
    (0..n)
        .map(|i| {
            format!(
                r#"{{"timestamp":"2024-05-01T10:00:00Z","service":"svc-{}","level":"INFO","message":"request {i} done resp_ms={}","cpu_percent_d":{}}}"#,
                i % 8,
                i % 500,
                i % 100
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn bench_parse(c: &mut Criterion) {
    let parser = LogParser::new();
    let body = payload(500);
    c.bench_function("parse_jsonl_500", |b| {
        b.iter(|| black_box(parser.parse(black_box(&body), InputFormat::Json)))
    });
}

fn bench_parse_and_dedup(c: &mut Criterion) {
    let parser = LogParser::new();
    let body = payload(500);
    let cache = DedupCache::new(Arc::new(SqliteStore::open_in_memory().unwrap()));
    // warm the cache so every iteration measures the all-duplicates path
    cache.filter_new(parser.parse(&body, InputFormat::Json).events, "bench");

    c.bench_function("parse_dedup_jsonl_500", |b| {
        b.iter(|| {
            let events = parser.parse(&body, InputFormat::Json).events;
            black_box(cache.filter_new(events, "bench"))
        })
    });
}

criterion_group!(benches, bench_parse, bench_parse_and_dedup);
criterion_main!(benches);
