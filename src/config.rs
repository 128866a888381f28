//! Pipeline configuration. Every section has defaults so a partial JSON file is enough.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Data directory (sqlite store, alert blobs)
    pub data_dir: PathBuf,
    pub dedup: DedupConfig,
    /// Topic, subscriptions and transport batch limits
    pub dispatch: DispatchConfig,
    /// Anomaly thresholds and keyword lists
    pub detector: DetectorConfig,
    pub metrics: MetricsConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    /// Logging
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub topic: String,
    /// One subscription per downstream consumer
    pub subscriptions: Vec<String>,
    pub alerts_topic: String,
    /// Events per chunk before a fresh transport batch is opened
    pub chunk_size: usize,
    /// Transport batch capacity (messages)
    pub max_batch_messages: usize,
    /// Transport batch capacity (bytes)
    pub max_batch_bytes: usize,
    /// Attempts per send, including the first
    pub max_send_attempts: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub cpu_high: f64,
    pub cpu_medium: f64,
    pub response_high_ms: f64,
    pub response_medium_ms: f64,
    pub memory_high_mb: f64,
    pub bytes_in_high: f64,
    pub bytes_out_high: f64,
    /// Trailing window for repeated-failure tracking
    pub pattern_window_secs: i64,
    /// Failures within the window that raise a pattern alert
    pub pattern_threshold: usize,
    /// Message fragments that count as a failure for pattern tracking
    pub failure_keywords: Vec<String>,
    /// Keywords scanned in unstructured text, in priority order
    pub unstructured_keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub error_rate_threshold_percent: f64,
    /// Distinct pending windows that trigger a flush
    pub batch_write_limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    Hashing,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    /// Output dimension of the hashing embedder
    pub dimensions: usize,
    /// Base URL of an OpenAI-compatible API when provider is `http`
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Upper bound on documents scanned per query
    pub corpus_cap: usize,
    pub default_top_k: usize,
    pub max_top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".logflow"),
            dedup: DedupConfig::default(),
            dispatch: DispatchConfig::default(),
            detector: DetectorConfig::default(),
            metrics: MetricsConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            topic: "log-events".to_string(),
            subscriptions: vec![
                "anomaly-detection-subscriber".to_string(),
                "metrics-subscriber".to_string(),
                "vector-embedding-subscriber".to_string(),
            ],
            alerts_topic: "alerts-events".to_string(),
            chunk_size: 100,
            max_batch_messages: 100,
            max_batch_bytes: 256 * 1024,
            max_send_attempts: 3,
            retry_backoff_ms: 200,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            cpu_high: 90.0,
            cpu_medium: 75.0,
            response_high_ms: 3000.0,
            response_medium_ms: 2000.0,
            memory_high_mb: 16000.0,
            bytes_in_high: 10_000_000.0,
            bytes_out_high: 10_000_000.0,
            pattern_window_secs: 300,
            pattern_threshold: 5,
            failure_keywords: ["failed login", "login failed", "authentication failed"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            unstructured_keywords: [
                "error",
                "failed",
                "fail",
                "critical",
                "exception",
                "timeout",
                "alert",
                "crash",
                "not responding",
                "issue",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold_percent: 5.0,
            batch_write_limit: 50,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hashing,
            dimensions: 256,
            endpoint: None,
            api_key: None,
            model: "text-embedding-ada-002".to_string(),
            timeout_secs: 15,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            corpus_cap: 1000,
            default_top_k: 5,
            max_top_k: 50,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

impl PipelineConfig {
    /// Load from JSON file if present; otherwise return default
    pub fn load(path: &Path) -> Self {
        Self::try_load(path).unwrap_or_else(|e| {
            warn!(path = ?path, error = %e, "using default config");
            Self::default()
        })
    }

    /// Like [`load`](Self::load), but an unreadable or malformed file is an error.
    pub fn try_load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("store.db")
    }

    pub fn alerts_dir(&self) -> PathBuf {
        self.data_dir.join("alerts")
    }
}
