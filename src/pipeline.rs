//! Wires every stage over one data directory: a sqlite store for shared state,
//! a blob directory for alert logs, and in-process topics for fan-out.

use crate::config::PipelineConfig;
use crate::consumer::{drain, AnomalyConsumer, Consumer, DrainReport, IndexConsumer, MetricsConsumer};
use crate::dedup::DedupCache;
use crate::detect::AnomalyDetector;
use crate::dispatch::{Dispatcher, InMemoryTopic, Subscription};
use crate::embedding;
use crate::error::StoreError;
use crate::ingest::Ingestor;
use crate::metrics::{MetricsAggregator, MetricsReport};
use crate::search::{Indexer, SemanticSearch};
use crate::storage::{DirBlobSink, SqliteStore};
use std::sync::Arc;
use tracing::info;

/// Messages pulled from a subscription per receive.
pub const RECEIVE_BATCH: usize = 64;

const ALERTS_SUBSCRIPTION: &str = "alert-notifier";

/// A consumer bound to the subscription it reads.
#[derive(Clone)]
pub struct Lane {
    pub subscription: Arc<Subscription>,
    pub consumer: Arc<dyn Consumer>,
}

impl Lane {
    pub fn drain(&self) -> DrainReport {
        drain(&self.subscription, self.consumer.as_ref(), RECEIVE_BATCH)
    }
}

pub struct Pipeline {
    pub config: PipelineConfig,
    pub store: Arc<SqliteStore>,
    pub events_topic: Arc<InMemoryTopic>,
    pub alerts_topic: Arc<InMemoryTopic>,
    pub ingestor: Ingestor,
    pub anomaly: Arc<AnomalyConsumer>,
    pub metrics: Arc<MetricsConsumer>,
    pub indexer: Arc<IndexConsumer>,
    pub search: SemanticSearch,
    pub report: MetricsReport,
    lanes: Vec<Lane>,
    alerts: Arc<Subscription>,
}

impl Pipeline {
    pub fn open(config: PipelineConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let store = Arc::new(SqliteStore::open(&config.store_path())?);
        let blobs = Arc::new(DirBlobSink::new(config.alerts_dir()));
        let d = &config.dispatch;

        let events_topic = Arc::new(InMemoryTopic::new(&d.topic, d.max_batch_messages, d.max_batch_bytes));
        let alerts_topic = Arc::new(InMemoryTopic::new(
            &d.alerts_topic,
            d.max_batch_messages,
            d.max_batch_bytes,
        ));
        let alerts = alerts_topic.subscribe(ALERTS_SUBSCRIPTION);

        let embedder = embedding::from_config(&config.embedding);
        let ingestor = Ingestor::new(
            DedupCache::new(store.clone()),
            config.dedup.enabled,
            Dispatcher::new(events_topic.clone(), d),
        );
        let anomaly = Arc::new(AnomalyConsumer::new(
            AnomalyDetector::new(&config.detector, store.clone()),
            Dispatcher::new(alerts_topic.clone(), d),
        ));
        let metrics = Arc::new(MetricsConsumer::new(MetricsAggregator::new(
            config.metrics.clone(),
            store.clone(),
            blobs,
        )));
        let indexer = Arc::new(IndexConsumer::new(Indexer::new(embedder.clone(), store.clone())));
        let search = SemanticSearch::new(embedder, store.clone(), &config.search);
        let report = MetricsReport::new(store.clone(), config.metrics.error_rate_threshold_percent);

        let consumers: [(&str, Arc<dyn Consumer>); 3] = [
            ("anomaly-detection-subscriber", anomaly.clone()),
            ("metrics-subscriber", metrics.clone()),
            ("vector-embedding-subscriber", indexer.clone()),
        ];
        let lanes = consumers
            .into_iter()
            .enumerate()
            .map(|(i, (fallback, consumer))| {
                let name = d.subscriptions.get(i).map(String::as_str).unwrap_or(fallback);
                Lane {
                    subscription: events_topic.subscribe(name),
                    consumer,
                }
            })
            .collect();

        info!(
            data_dir = ?config.data_dir,
            topic = %d.topic,
            subscriptions = ?events_topic.subscription_names(),
            "pipeline ready"
        );

        Ok(Self {
            config,
            store,
            events_topic,
            alerts_topic,
            ingestor,
            anomaly,
            metrics,
            indexer,
            search,
            report,
            lanes,
            alerts,
        })
    }

    /// Anomaly, metrics and indexing lanes, in that order.
    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    /// Drain every lane one after another on the calling thread.
    pub fn drain_all(&self) -> Vec<DrainReport> {
        self.lanes.iter().map(Lane::drain).collect()
    }

    /// Published alerts not yet taken, oldest first.
    pub fn take_alerts(&self) -> Vec<crate::detect::AnomalyAlert> {
        self.alerts
            .receive(usize::MAX)
            .into_iter()
            .filter_map(|body| serde_json::from_slice(&body).ok())
            .collect()
    }
}
