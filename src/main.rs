//! logflow entrypoint: ingest a log file and run the consumers, search the
//! semantic index, or query persisted metric windows.

use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use logflow::{
    config::PipelineConfig,
    consumer::DrainReport,
    ingest::IngestOptions,
    logging::StructuredLogger,
    pipeline::Pipeline,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(version, about = "Parse, deduplicate, fan out and analyze logs", long_about = None)]
struct Cli {
    /// JSON config file; defaults apply when it is missing
    #[arg(long, env = "LOGFLOW_CONFIG_PATH", default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a file, then drain every consumer and flush metrics
    Ingest {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        log_type: String,
        /// text, json or jsonl
        #[arg(long, default_value = "json")]
        format: String,
        #[arg(long)]
        skip_dedup: bool,
        #[arg(long)]
        reset_cache: bool,
    },

    /// Rank indexed documents by similarity to a query
    Search {
        #[arg(long)]
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Query persisted metric windows
    Metrics {
        #[command(subcommand)]
        cmd: MetricsCommand,
    },

    /// Forget every content hash recorded for a log type
    ResetCache {
        #[arg(long)]
        log_type: String,
    },

    /// Drop indexed documents older than the given age
    PruneIndex {
        #[arg(long)]
        older_than_days: i64,
    },
}

#[derive(Subcommand)]
enum MetricsCommand {
    /// Most recent windows across all services
    Latest {
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Windows above the error-rate threshold
    Anomalies {
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Windows and aggregates for one service
    Service {
        name: String,
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let loaded = PipelineConfig::try_load(&cli.config);
    let config = loaded.as_ref().cloned().unwrap_or_default();
    StructuredLogger::init(config.log.json, &config.log.level);
    if let Err(e) = &loaded {
        warn!(config = ?cli.config, error = %e, "using default config");
    }
    info!(config = ?cli.config, data_dir = ?config.data_dir, "logflow starting");

    let pipeline = Arc::new(Pipeline::open(config)?);
    let mut out = std::io::stdout().lock();

    match cli.command {
        Commands::Ingest {
            file,
            log_type,
            format,
            skip_dedup,
            reset_cache,
        } => {
            let payload = std::fs::read_to_string(&file)?;
            let options = IngestOptions {
                skip_dedup,
                reset_cache,
            };
            let report = pipeline.ingestor.ingest(&payload, &log_type, &format, options)?;
            StructuredLogger::emit_json(&report, &mut out)?;

            for drained in drain_concurrently(&pipeline).await {
                StructuredLogger::emit_json(&drained, &mut out)?;
            }
            let alerts = pipeline.take_alerts();
            info!(alerts = alerts.len(), "alerts published");
            for alert in &alerts {
                StructuredLogger::emit_json(alert, &mut out)?;
            }
        }
        Commands::Search { query, top_k } => {
            let top_k = top_k.unwrap_or(pipeline.config.search.default_top_k);
            for hit in pipeline.search.search(&query, top_k)? {
                StructuredLogger::emit_json(&hit, &mut out)?;
            }
        }
        Commands::Metrics { cmd } => {
            let report = &pipeline.report;
            match cmd {
                MetricsCommand::Latest { top } => {
                    for w in report.latest(top)? {
                        StructuredLogger::emit_json(&w, &mut out)?;
                    }
                }
                MetricsCommand::Anomalies { top } => {
                    for w in report.anomalies(top)? {
                        StructuredLogger::emit_json(&w, &mut out)?;
                    }
                }
                MetricsCommand::Service { name, top } => {
                    let summary = json!({
                        "service": name,
                        "avgCpu": report.avg_cpu(&name)?,
                        "avgMemory": report.avg_memory(&name)?,
                        "maxLatency": report.max_latency(&name)?,
                        "errorRates": report.error_rates(&name)?,
                        "topUsers": report.top_users(&name, top)?,
                        "windows": report.by_service(&name, top)?,
                    });
                    StructuredLogger::emit_json(&summary, &mut out)?;
                }
            }
        }
        Commands::ResetCache { log_type } => {
            pipeline.ingestor.reset_cache(&log_type)?;
            StructuredLogger::emit_json(&json!({ "logType": log_type, "reset": true }), &mut out)?;
        }
        Commands::PruneIndex { older_than_days } => {
            let cutoff = Utc::now() - Duration::days(older_than_days.max(0));
            let removed = pipeline.store.prune_documents_before(cutoff.timestamp_millis())?;
            info!(removed, older_than_days, "index pruned");
            StructuredLogger::emit_json(&json!({ "removed": removed }), &mut out)?;
        }
    }

    Ok(())
}

/// Each lane drains on its own blocking thread; there is no ordering between them.
async fn drain_concurrently(pipeline: &Arc<Pipeline>) -> Vec<DrainReport> {
    let handles: Vec<_> = pipeline
        .lanes()
        .iter()
        .cloned()
        .map(|lane| tokio::task::spawn_blocking(move || lane.drain()))
        .collect();
    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(e) => warn!(error = %e, "consumer task failed"),
        }
    }
    reports
}
