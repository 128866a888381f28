//! Error types shared across stages.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("send to {topic} rejected: {reason}")]
    SendRejected { topic: String, reason: String },
    #[error("message of {size} bytes exceeds batch capacity of {capacity} bytes")]
    MessageTooLarge { size: usize, capacity: usize },
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("embedding endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("embedding response carried no vector")]
    EmptyResponse,
    #[error("no embedding endpoint configured")]
    NotConfigured,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported format {0:?}; use text, json or jsonl")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Contained failures. These are logged where they happen and only surface to a
/// caller as part of a report; none of them aborts batch processing.
#[derive(Debug, Error)]
pub enum Fault {
    #[error("input degraded to a raw record: {0}")]
    ParseDegraded(String),
    #[error("dedup cache for {log_type} not persisted: {source}")]
    DedupPersistenceFailed {
        log_type: String,
        #[source]
        source: StoreError,
    },
    #[error("publish partially failed: {succeeded} sent, {not_sent} not sent")]
    PublishPartial { succeeded: usize, not_sent: usize },
    #[error("{strategy} detection failed: {reason}")]
    DetectionFault { strategy: &'static str, reason: String },
    #[error("metric update for {window} failed: {reason}")]
    AggregationFault { window: String, reason: String },
    #[error("document {id} not indexed: {reason}")]
    IndexSkipped { id: String, reason: String },
    #[error("similarity for {id} degraded to zero: {reason}")]
    SearchDegraded { id: String, reason: String },
}
