//! logflow: log ingestion core.
//!
//! Raw payloads are parsed into canonical events, deduplicated by content hash,
//! and fanned out to three independent consumers:
//! - [`detect`]: structured, unstructured and repeated-failure anomaly detection
//! - [`metrics`]: per-service, per-minute windows with batched persistence
//! - [`search`]: embedding index and cosine-similarity search
//!
//! Shared state lives behind the traits in [`storage`].

pub mod config;
pub mod consumer;
pub mod dedup;
pub mod detect;
pub mod dispatch;
pub mod embedding;
pub mod error;
pub mod event;
pub mod ingest;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod search;
pub mod storage;

pub use config::PipelineConfig;
pub use dedup::{content_hash, DedupCache};
pub use detect::{AnomalyAlert, AnomalyDetector};
pub use dispatch::{Dispatcher, Envelope, PublishResult, PublishStatus};
pub use event::{CanonicalEvent, InputFormat, LogParser};
pub use ingest::{IngestOptions, IngestReport, IngestStatus, Ingestor};
pub use logging::StructuredLogger;
pub use metrics::{MetricWindow, MetricsAggregator, MetricsReport};
pub use pipeline::Pipeline;
pub use search::{IndexedDocument, Indexer, SearchHit, SemanticSearch};
pub use storage::SqliteStore;
