//! Anomaly detection: threshold rules, keyword scan, repeated failures.

use chrono::{DateTime, Duration, TimeZone, Utc};
use logflow::config::DetectorConfig;
use logflow::detect::{AnomalyAlert, AnomalyDetector, PatternDetector, StructuredRule};
use logflow::event::CanonicalEvent;
use logflow::storage::{MemoryPatternStore, PatternStore, SqliteStore};
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

fn detector() -> AnomalyDetector {
    AnomalyDetector::new(&DetectorConfig::default(), Arc::new(MemoryPatternStore::new()))
}

fn failed_login(ip: &str) -> CanonicalEvent {
    CanonicalEvent {
        client_ip: Some(ip.into()),
        service: Some("auth".into()),
        level: Some("INFO".into()),
        message: Some("Failed login for admin".into()),
        ..Default::default()
    }
}

fn patterns(alerts: &[AnomalyAlert]) -> Vec<&AnomalyAlert> {
    alerts
        .iter()
        .filter(|a| matches!(a, AnomalyAlert::Pattern { .. }))
        .collect()
}

#[test]
fn high_cpu_alone_yields_one_structured_alert() {
    let ev = CanonicalEvent {
        cpu_percent: Some(95.0),
        ..Default::default()
    };
    let alerts = detector().evaluate(&ev, t0());
    assert_eq!(alerts.len(), 1);
    match &alerts[0] {
        AnomalyAlert::Structured { base, rule } => {
            assert_eq!(*rule, StructuredRule::HighCpu);
            assert!(base.detected_reason.contains("CPU"));
            assert!(base.detected_reason.contains("95"));
        }
        other => panic!("unexpected alert {other:?}"),
    }
}

#[test]
fn quiet_info_event_yields_nothing() {
    let ev = CanonicalEvent {
        cpu_percent: Some(10.0),
        response_ms: Some(100.0),
        level: Some("INFO".into()),
        ..Default::default()
    };
    assert!(detector().evaluate(&ev, t0()).is_empty());
}

#[test]
fn first_threshold_rule_wins_and_severity_is_independent() {
    let ev = CanonicalEvent {
        cpu_percent: Some(80.0),
        response_ms: Some(5000.0),
        memory_mb: Some(20000.0),
        level: Some("Error".into()),
        service: Some("api".into()),
        ..Default::default()
    };
    let rules: Vec<StructuredRule> = detector()
        .evaluate(&ev, t0())
        .into_iter()
        .filter_map(|a| match a {
            AnomalyAlert::Structured { rule, .. } => Some(rule),
            _ => None,
        })
        .collect();
    assert_eq!(rules, vec![StructuredRule::CpuWithLatency, StructuredRule::Severity]);
}

#[test]
fn network_bytes_rule() {
    let ev = CanonicalEvent {
        bytes_out: Some(2e7),
        ..Default::default()
    };
    let alerts = detector().evaluate(&ev, t0());
    assert!(matches!(
        alerts.as_slice(),
        [AnomalyAlert::Structured { rule: StructuredRule::HighNetwork, .. }]
    ));
}

#[test]
fn non_finite_value_only_disables_structured_strategy() {
    let ev = CanonicalEvent {
        cpu_percent: Some(f64::NAN),
        raw: Some("worker crash detected".into()),
        ..Default::default()
    };
    let alerts = detector().evaluate(&ev, t0());
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind(), "unstructured");
}

#[test]
fn unstructured_reports_first_keyword_in_list_order() {
    let ev = CanonicalEvent::raw("Request TIMEOUT after upstream exception");
    let alerts = detector().evaluate(&ev, t0());
    match alerts.as_slice() {
        [AnomalyAlert::Unstructured { keyword, excerpt, .. }] => {
            assert_eq!(keyword, "exception");
            assert_eq!(excerpt, "Request TIMEOUT after upstream exception");
        }
        other => panic!("unexpected alerts {other:?}"),
    }
}

#[test]
fn structured_messages_skip_keyword_scan() {
    let ev = CanonicalEvent {
        service: Some("api".into()),
        level: Some("info".into()),
        message: Some("retrying after timeout".into()),
        ..Default::default()
    };
    assert!(detector().evaluate(&ev, t0()).is_empty());
}

#[test]
fn fifth_failure_alerts_and_sixth_alerts_again() {
    let d = detector();
    let mut fired = Vec::new();
    for i in 0..6 {
        let alerts = d.evaluate(&failed_login("10.0.0.1"), t0() + Duration::seconds(i * 10));
        fired.push(patterns(&alerts).len());
    }
    assert_eq!(fired, vec![0, 0, 0, 0, 1, 1]);
}

#[test]
fn quiet_event_for_key_at_threshold_still_alerts() {
    let d = detector();
    for i in 0..5 {
        d.evaluate(&failed_login("1.2.3.4"), t0() + Duration::seconds(i));
    }
    let ok = CanonicalEvent {
        client_ip: Some("1.2.3.4".into()),
        level: Some("INFO".into()),
        message: Some("ok".into()),
        ..Default::default()
    };
    let alerts = d.evaluate(&ok, t0() + Duration::seconds(6));
    match patterns(&alerts).as_slice() {
        [AnomalyAlert::Pattern { key, failures, .. }] => {
            assert_eq!(key, "1.2.3.4");
            assert_eq!(*failures, 5);
        }
        other => panic!("unexpected alerts {other:?}"),
    }
    // once the failures expire the same event is quiet again
    let alerts = d.evaluate(&ok, t0() + Duration::seconds(400));
    assert!(patterns(&alerts).is_empty());
}

#[test]
fn pattern_alert_names_key_and_count() {
    let d = detector();
    let mut last = Vec::new();
    for i in 0..5 {
        last = d.evaluate(&failed_login("10.0.0.9"), t0() + Duration::seconds(i));
    }
    match patterns(&last).as_slice() {
        [AnomalyAlert::Pattern { key, failures, window_secs, base }] => {
            assert_eq!(key, "10.0.0.9");
            assert_eq!(*failures, 5);
            assert_eq!(*window_secs, 300);
            assert_eq!(base.detected_reason, "Repeated failures for 10.0.0.9 in last 5 min");
        }
        other => panic!("unexpected alerts {other:?}"),
    }
}

#[test]
fn failures_outside_window_do_not_count() {
    let d = detector();
    for i in 0..4 {
        d.evaluate(&failed_login("10.0.0.2"), t0() + Duration::seconds(i));
    }
    // window is 300s; the first four have expired by now
    let later = t0() + Duration::seconds(400);
    let alerts = d.evaluate(&failed_login("10.0.0.2"), later);
    assert!(patterns(&alerts).is_empty());
}

#[test]
fn keys_are_tracked_independently() {
    let d = detector();
    for i in 0..4 {
        d.evaluate(&failed_login("10.0.0.3"), t0() + Duration::seconds(i));
        d.evaluate(&failed_login("10.0.0.4"), t0() + Duration::seconds(i));
    }
    let alerts = d.evaluate(&failed_login("10.0.0.3"), t0() + Duration::seconds(5));
    assert_eq!(patterns(&alerts).len(), 1);
    let alerts = d.evaluate(&failed_login("10.0.0.5"), t0() + Duration::seconds(5));
    assert!(patterns(&alerts).is_empty());
}

#[test]
fn memory_store_drops_expired_keys() {
    let store = MemoryPatternStore::new();
    let window = Duration::seconds(300);
    store.record("k", t0(), window, true).unwrap();
    assert_eq!(store.tracked_keys(), 1);
    let count = store
        .record("k", t0() + Duration::seconds(301), window, false)
        .unwrap();
    assert_eq!(count, 0);
    assert_eq!(store.tracked_keys(), 0);
}

#[test]
fn shared_sqlite_store_counts_across_detectors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let config = DetectorConfig::default();
    let a = PatternDetector::new(&config, Arc::new(SqliteStore::open(&path).unwrap()));
    let b = PatternDetector::new(&config, Arc::new(SqliteStore::open(&path).unwrap()));

    let mut results = Vec::new();
    for i in 0..5 {
        let d = if i % 2 == 0 { &a } else { &b };
        results.push(d.observe(&failed_login("10.1.1.1"), t0() + Duration::seconds(i)).unwrap());
    }
    assert!(results[..4].iter().all(Option::is_none));
    assert!(results[4].is_some());
}

#[test]
fn alert_serializes_with_type_tag() {
    let alerts = detector().evaluate(
        &CanonicalEvent {
            cpu_percent: Some(99.0),
            ..Default::default()
        },
        t0(),
    );
    let json = serde_json::to_value(&alerts[0]).unwrap();
    assert_eq!(json["alertType"], "STRUCTURED_ANOMALY");
    assert_eq!(json["detectedReason"], "High CPU usage: 99%");
    assert_eq!(json["event"]["cpuPercent"], 99.0);
    let back: AnomalyAlert = serde_json::from_value(json).unwrap();
    assert_eq!(back, alerts[0]);
}
