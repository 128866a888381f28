//! End to end: config, ingest, fan-out, the three consumers, queries.

use logflow::config::PipelineConfig;
use logflow::consumer::decode;
use logflow::detect::AnomalyAlert;
use logflow::error::{ConfigError, IngestError};
use logflow::ingest::{IngestOptions, IngestStatus};
use logflow::pipeline::Pipeline;
use logflow::storage::{BlobSink, DirBlobSink};
use std::path::Path;

fn payload() -> String {
    let mut lines: Vec<String> = (0..6)
        .map(|i| {
            format!(
                r#"{{"timestamp":"2024-05-01T10:00:{i:02}Z","service":"auth","level":"INFO","client_ip":"10.0.0.7","message":"Failed login for admin","attempt":{i}}}"#
            )
        })
        .collect();
    lines.push(
        r#"{"timestamp":"2024-05-01T10:00:30Z","service":"api","level":"ERROR","message":"upstream refused","cpu_percent":97.0,"user_id":"u1"}"#
            .to_string(),
    );
    lines.push("this line is not json".to_string());
    lines.join("\n")
}

fn open(dir: &Path) -> Pipeline {
    let mut config = PipelineConfig::default();
    config.data_dir = dir.to_path_buf();
    config.dispatch.retry_backoff_ms = 0;
    Pipeline::open(config).unwrap()
}

#[test]
fn config_load_default() {
    let c = PipelineConfig::load(Path::new("nonexistent.json"));
    assert_eq!(c.dispatch.topic, "log-events");
    assert_eq!(c.dispatch.subscriptions.len(), 3);
    assert_eq!(c.detector.pattern_threshold, 5);
    assert_eq!(c.metrics.batch_write_limit, 50);
    assert_eq!(c.search.corpus_cap, 1000);
}

#[test]
fn config_load_partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"detector":{"cpu_high":80},"log":{"json":false}}"#).unwrap();
    let c = PipelineConfig::load(&path);
    assert_eq!(c.detector.cpu_high, 80.0);
    assert_eq!(c.detector.cpu_medium, 75.0);
    assert!(!c.log.json);
}

#[test]
fn config_try_load_reports_malformed_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"detector":{"cpu_high":"eighty"}}"#).unwrap();
    assert!(matches!(PipelineConfig::try_load(&path), Err(ConfigError::Parse(_))));
    assert_eq!(PipelineConfig::load(&path).detector.cpu_high, 90.0);
    assert!(PipelineConfig::try_load(&dir.path().join("missing.json")).is_ok());
}

#[test]
fn ingest_then_consume_everything() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = open(dir.path());

    let report = pipeline
        .ingestor
        .ingest(&payload(), "app", "jsonl", IngestOptions::default())
        .unwrap();
    assert_eq!(report.status, IngestStatus::Success);
    assert_eq!(report.parsed, 8);
    assert_eq!(report.degraded, 1);
    assert_eq!(report.unique, 8);
    assert_eq!(report.publish.as_ref().unwrap().accepted, 8);

    let drained = pipeline.drain_all();
    assert_eq!(drained.len(), 3);
    assert!(drained.iter().all(|d| d.handled == 8 && d.faults == 0));

    let alerts = pipeline.take_alerts();
    let pattern = alerts
        .iter()
        .filter(|a| matches!(a, AnomalyAlert::Pattern { .. }))
        .count();
    assert_eq!(pattern, 2);
    assert!(alerts.iter().any(|a| a.reason() == "High CPU usage: 97%"));
    assert!(alerts.iter().any(|a| a.reason() == "High severity log: error"));
    // the raw line carries no keyword, so nothing unstructured
    assert_eq!(alerts.len(), 4);
    assert_eq!(pipeline.anomaly.raised(), alerts.len());

    let auth = pipeline.report.by_service("auth", 10).unwrap();
    assert_eq!(auth.len(), 1);
    assert_eq!(auth[0].total_logs, 6);
    let api = pipeline.report.by_service("api", 10).unwrap();
    assert_eq!(api[0].error_rate_percent, 100.0);
    let alert_log = DirBlobSink::new(dir.path().join("alerts"))
        .read("api_2024-05-01.log")
        .unwrap()
        .unwrap();
    assert!(alert_log.starts_with("ALERT: Service api exceeded error threshold!"));

    let hits = pipeline.search.search("auth failed login admin", 3).unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].service.as_deref(), Some("auth"));
}

#[test]
fn repeated_ingest_is_deduplicated_until_reset() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = open(dir.path());
    let first = pipeline
        .ingestor
        .ingest(&payload(), "app", "json", IngestOptions::default())
        .unwrap();
    assert_eq!(first.unique, 8);

    let again = pipeline
        .ingestor
        .ingest(&payload(), "app", "json", IngestOptions::default())
        .unwrap();
    assert_eq!(again.status, IngestStatus::Skipped);
    assert_eq!(again.duplicates, 8);
    assert!(again.publish.is_none());

    let forced = pipeline
        .ingestor
        .ingest(
            &payload(),
            "app",
            "json",
            IngestOptions {
                skip_dedup: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(forced.unique, 8);

    let reset = pipeline
        .ingestor
        .ingest(
            &payload(),
            "app",
            "json",
            IngestOptions {
                reset_cache: true,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(reset.status, IngestStatus::Success);
    assert_eq!(reset.unique, 8);
}

#[test]
fn text_ingest_and_unknown_format() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = open(dir.path());
    let report = pipeline
        .ingestor
        .ingest("INFO web: started\nWARN web: slow response_ms=2500\n", "web", "text", IngestOptions::default())
        .unwrap();
    assert_eq!(report.unique, 2);

    let err = pipeline
        .ingestor
        .ingest("{}", "web", "csv", IngestOptions::default())
        .unwrap_err();
    assert!(matches!(err, IngestError::UnsupportedFormat(_)));
}

#[test]
fn decode_accepts_envelopes_bare_objects_and_text() {
    let env = decode(br#"{"rule":"app","log":{"service":"a","msg":"hi"}}"#);
    assert_eq!(env.rule, "app");
    assert_eq!(env.log.message.as_deref(), Some("hi"));

    let bare = decode(br#"{"service":"b"}"#);
    assert_eq!(bare.log.service.as_deref(), Some("b"));

    let text = decode(b"plain text body");
    assert_eq!(text.log.raw.as_deref(), Some("plain text body"));
}
