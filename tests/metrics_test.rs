//! Metrics: window keys, derived values, error-rate alerts, batched merge-on-flush.

use chrono::{DateTime, TimeZone, Utc};
use logflow::config::MetricsConfig;
use logflow::error::Fault;
use logflow::event::CanonicalEvent;
use logflow::metrics::{MetricContribution, MetricWindow, MetricsAggregator, MetricsReport, WindowKey};
use logflow::storage::{BlobSink, DirBlobSink, MetricsStore, SqliteStore};
use std::sync::Arc;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 30).unwrap()
}

fn event(service: &str, ts: &str, level: &str, cpu: f64) -> CanonicalEvent {
    CanonicalEvent {
        service: Some(service.into()),
        timestamp: Some(ts.into()),
        level: Some(level.into()),
        cpu_percent: Some(cpu),
        ..Default::default()
    }
}

fn config(batch_write_limit: usize) -> MetricsConfig {
    MetricsConfig {
        batch_write_limit,
        ..Default::default()
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<SqliteStore>,
    blobs: Arc<DirBlobSink>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(&dir.path().join("store.db")).unwrap());
    let blobs = Arc::new(DirBlobSink::new(dir.path().join("alerts")));
    Fixture {
        _dir: dir,
        store,
        blobs,
    }
}

#[test]
fn window_id_truncates_to_minute() {
    let key = WindowKey::new("payments", Utc.with_ymd_and_hms(2025, 11, 9, 8, 27, 59).unwrap());
    assert_eq!(key.id(), "payments-2025-11-09-08-27");
}

#[test]
fn derived_values_track_sums_after_every_update() {
    let f = fixture();
    let agg = MetricsAggregator::new(config(50), f.store.clone(), f.blobs.clone());
    let mut last = MetricWindow::default();
    for (i, cpu) in [10.0, 20.0, 45.5].into_iter().enumerate() {
        let ts = format!("2024-05-01T10:00:{:02}Z", i * 10);
        last = agg.record(&event("api", &ts, "info", cpu), now()).unwrap();
        assert_eq!(last.avg_cpu, last.cpu_sum / last.total_logs.max(1) as f64);
    }
    assert_eq!(last.id, "api-2024-05-01-10-00");
    assert_eq!(last.total_logs, 3);
    assert_eq!(last.max_cpu, 45.5);
    assert_eq!(last.throughput_per_min, 3);
    assert_eq!(last.error_rate_percent, 0.0);
    assert_eq!(last.user_requests.get("unknown"), Some(&3));
}

#[test]
fn missing_service_and_timestamp_fall_back() {
    let c = MetricContribution::from_event(&CanonicalEvent::message_only("x"), now());
    assert_eq!(c.key.id(), "unknown-2024-05-01-10-00");
}

#[test]
fn error_rate_over_threshold_appends_alert_line() {
    let f = fixture();
    let agg = MetricsAggregator::new(config(50), f.store.clone(), f.blobs.clone());
    agg.record(&event("api", "2024-05-01T10:00:01Z", "ERROR", 1.0), now()).unwrap();
    agg.record(&event("api", "2024-05-01T10:00:02Z", "info", 1.0), now()).unwrap();

    let body = f.blobs.read("api_2024-05-01.log").unwrap().unwrap();
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(
        lines,
        vec![
            "ALERT: Service api exceeded error threshold! Error rate: 100.00% | Time window: api-2024-05-01-10-00",
            "ALERT: Service api exceeded error threshold! Error rate: 50.00% | Time window: api-2024-05-01-10-00",
        ]
    );
}

#[test]
fn warnings_are_counted_but_not_errors() {
    let f = fixture();
    let agg = MetricsAggregator::new(config(50), f.store.clone(), f.blobs.clone());
    let w = agg
        .record(&event("api", "2024-05-01T10:00:01Z", "WARN", 1.0), now())
        .unwrap();
    assert_eq!(w.warning_logs, 1);
    assert_eq!(w.error_logs, 0);
    assert!(f.blobs.read("api_2024-05-01.log").unwrap().is_none());
}

#[test]
fn flushes_when_pending_windows_reach_limit() {
    let f = fixture();
    let agg = MetricsAggregator::new(config(2), f.store.clone(), f.blobs.clone());
    agg.record(&event("a", "2024-05-01T10:00:00Z", "info", 1.0), now()).unwrap();
    agg.record(&event("a", "2024-05-01T10:00:10Z", "info", 1.0), now()).unwrap();
    assert_eq!(agg.pending_windows(), 1);
    assert!(f.store.get_window("a-2024-05-01-10-00").unwrap().is_none());

    agg.record(&event("b", "2024-05-01T10:00:00Z", "info", 1.0), now()).unwrap();
    assert_eq!(agg.pending_windows(), 0);
    assert_eq!(f.store.get_window("a-2024-05-01-10-00").unwrap().unwrap().total_logs, 2);
    assert_eq!(f.store.get_window("b-2024-05-01-10-00").unwrap().unwrap().total_logs, 1);

    // the flushed window keeps accumulating
    let w = agg.record(&event("a", "2024-05-01T10:00:20Z", "info", 1.0), now()).unwrap();
    assert_eq!(w.total_logs, 3);
    agg.flush().unwrap();
    assert_eq!(f.store.get_window("a-2024-05-01-10-00").unwrap().unwrap().total_logs, 3);
}

#[test]
fn refreshing_without_new_events_changes_nothing() {
    let f = fixture();
    let agg = MetricsAggregator::new(config(50), f.store.clone(), f.blobs.clone());
    agg.record(&event("a", "2024-05-01T10:00:00Z", "info", 5.0), now()).unwrap();
    assert_eq!(agg.flush().unwrap().written, 1);
    assert_eq!(agg.flush().unwrap().written, 0);
    assert_eq!(f.store.get_window("a-2024-05-01-10-00").unwrap().unwrap().total_logs, 1);
}

#[test]
fn instances_sharing_a_store_add_up() {
    let f = fixture();
    let second_store = Arc::new(SqliteStore::open(&f._dir.path().join("store.db")).unwrap());
    let a = MetricsAggregator::new(config(50), f.store.clone(), f.blobs.clone());
    let b = MetricsAggregator::new(config(50), second_store, f.blobs.clone());

    a.record(&event("api", "2024-05-01T10:00:01Z", "info", 10.0), now()).unwrap();
    b.record(&event("api", "2024-05-01T10:00:02Z", "ERROR", 30.0), now()).unwrap();
    a.flush().unwrap();
    b.flush().unwrap();

    let w = f.store.get_window("api-2024-05-01-10-00").unwrap().unwrap();
    assert_eq!(w.total_logs, 2);
    assert_eq!(w.error_logs, 1);
    assert_eq!(w.avg_cpu, 20.0);
    assert_eq!(w.error_rate_percent, 50.0);
}

#[test]
fn non_finite_field_is_an_aggregation_fault() {
    let f = fixture();
    let agg = MetricsAggregator::new(config(50), f.store.clone(), f.blobs.clone());
    let err = agg
        .record(&event("api", "2024-05-01T10:00:01Z", "info", f64::INFINITY), now())
        .unwrap_err();
    assert!(matches!(err, Fault::AggregationFault { ref window, .. } if window == "api-2024-05-01-10-00"));
    assert_eq!(agg.pending_windows(), 0);
    assert!(agg.window("api-2024-05-01-10-00").is_none());
}

#[test]
fn report_queries_over_persisted_windows() {
    let f = fixture();
    let agg = MetricsAggregator::new(config(50), f.store.clone(), f.blobs.clone());
    let mut e1 = event("api", "2024-05-01T10:00:01Z", "info", 10.0);
    e1.user_id = Some("alice".into());
    e1.response_ms = Some(120.0);
    let mut e2 = event("api", "2024-05-01T10:01:01Z", "error", 40.0);
    e2.user_id = Some("bob".into());
    e2.response_ms = Some(900.0);
    let mut e3 = event("api", "2024-05-01T10:01:30Z", "info", 40.0);
    e3.user_id = Some("bob".into());
    for e in [&e1, &e2, &e3] {
        agg.record(e, now()).unwrap();
    }
    agg.record(&event("web", "2024-05-01T10:02:00Z", "info", 1.0), now()).unwrap();
    agg.flush().unwrap();

    let report = MetricsReport::new(f.store.clone(), 5.0);
    assert_eq!(report.avg_cpu("api").unwrap(), 30.0);
    assert_eq!(report.max_latency("api").unwrap(), 900.0);
    assert_eq!(
        report.top_users("api", 1).unwrap(),
        vec![("bob".to_string(), 2)]
    );
    assert_eq!(
        report.error_rates("api").unwrap(),
        vec![
            ("api-2024-05-01-10-01".to_string(), 50.0),
            ("api-2024-05-01-10-00".to_string(), 0.0)
        ]
    );
    let latest: Vec<String> = report.latest(2).unwrap().into_iter().map(|w| w.id).collect();
    assert_eq!(latest, vec!["web-2024-05-01-10-02", "api-2024-05-01-10-01"]);
    let anomalies = report.anomalies(10).unwrap();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].id, "api-2024-05-01-10-01");
    assert_eq!(report.by_service("web", 10).unwrap().len(), 1);
    assert_eq!(report.avg_memory("nobody").unwrap(), 0.0);
}
