//! Shared-store benchmark: metric window merges and pattern records.

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use logflow::event::CanonicalEvent;
use logflow::metrics::{MetricContribution, MetricWindow};
use logflow::storage::{MetricsStore, PatternStore, SqliteStore};
use tempfile::tempdir;

fn bench_merge_window(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = SqliteStore::open(&dir.path().join("store.db")).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let ev = CanonicalEvent {
        service: Some("bench".into()),
        cpu_percent: Some(42.0),
        ..Default::default()
    };
    let contribution = MetricContribution::from_event(&ev, now);
    let mut delta = MetricWindow::new(&contribution.key);
    delta.apply(&contribution);

    c.bench_function("storage_merge_window", |b| {
        b.iter(|| black_box(store.merge_window(&delta)).unwrap())
    });
}

fn bench_pattern_record(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = SqliteStore::open(&dir.path().join("store.db")).unwrap();
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let window = Duration::seconds(300);
    let mut tick = 0i64;

    c.bench_function("storage_pattern_record", |b| {
        b.iter(|| {
            tick += 1;
            let now = start + Duration::milliseconds(tick);
            black_box(store.record("10.0.0.1", now, window, true)).unwrap()
        })
    });
}

criterion_group!(benches, bench_merge_window, bench_pattern_record);
criterion_main!(benches);
