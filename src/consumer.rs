//! Subscription consumers. Each one reads its own subscription independently;
//! no ordering holds between them for the same event.

use crate::detect::AnomalyDetector;
use crate::dispatch::{Dispatcher, Envelope, PublishStatus, Subscription};
use crate::error::{Fault, StoreError};
use crate::event::CanonicalEvent;
use crate::metrics::{FlushReport, MetricsAggregator};
use crate::search::Indexer;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

pub trait Consumer: Send + Sync {
    fn name(&self) -> &str;
    /// Process one envelope. Errors are contained by the caller.
    fn handle(&self, envelope: &Envelope) -> Result<(), Fault>;
    /// Called once the subscription is drained.
    fn finish(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// A message body as an envelope. Bodies that are not envelopes still yield an
/// event: a bare JSON object is taken as the log, anything else as raw text.
pub fn decode(body: &[u8]) -> Envelope {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(mut obj)) if obj.contains_key("log") => {
            let rule = match obj.remove("rule") {
                Some(Value::String(s)) => s,
                _ => String::new(),
            };
            let log = obj
                .remove("log")
                .map(CanonicalEvent::from_json_value)
                .unwrap_or_default();
            Envelope { rule, log }
        }
        Ok(other) => Envelope {
            rule: String::new(),
            log: CanonicalEvent::from_json_value(other),
        },
        Err(_) => Envelope {
            rule: String::new(),
            log: CanonicalEvent::raw(String::from_utf8_lossy(body)),
        },
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub consumer: String,
    pub handled: usize,
    pub faults: usize,
}

/// Receive and handle until the subscription is empty, then call `finish`.
pub fn drain(subscription: &Subscription, consumer: &dyn Consumer, batch: usize) -> DrainReport {
    let mut report = DrainReport {
        consumer: consumer.name().to_string(),
        ..Default::default()
    };
    loop {
        let messages = subscription.receive(batch.max(1));
        if messages.is_empty() {
            break;
        }
        for body in messages {
            let envelope = decode(&body);
            match consumer.handle(&envelope) {
                Ok(()) => report.handled += 1,
                Err(e) => {
                    report.faults += 1;
                    warn!(consumer = consumer.name(), error = %e, "message not processed");
                }
            }
        }
    }
    if let Err(e) = consumer.finish() {
        warn!(consumer = consumer.name(), error = %e, "finish failed");
    }
    info!(
        consumer = consumer.name(),
        subscription = subscription.name(),
        handled = report.handled,
        faults = report.faults,
        "subscription drained"
    );
    report
}

pub struct AnomalyConsumer {
    detector: AnomalyDetector,
    alerts: Dispatcher,
    raised: AtomicUsize,
}

impl AnomalyConsumer {
    pub fn new(detector: AnomalyDetector, alerts: Dispatcher) -> Self {
        Self {
            detector,
            alerts,
            raised: AtomicUsize::new(0),
        }
    }

    /// Alerts published so far.
    pub fn raised(&self) -> usize {
        self.raised.load(Ordering::Relaxed)
    }
}

impl Consumer for AnomalyConsumer {
    fn name(&self) -> &str {
        "anomaly-detector"
    }

    fn handle(&self, envelope: &Envelope) -> Result<(), Fault> {
        let alerts = self.detector.evaluate(&envelope.log, Utc::now());
        if alerts.is_empty() {
            return Ok(());
        }
        for alert in &alerts {
            info!(kind = alert.kind(), reason = alert.reason(), "anomaly detected");
        }
        let result = self.alerts.publish_items(&alerts);
        self.raised.fetch_add(result.accepted, Ordering::Relaxed);
        match result.status {
            PublishStatus::Success | PublishStatus::Skipped => Ok(()),
            _ => Err(Fault::PublishPartial {
                succeeded: result.accepted,
                not_sent: result.not_sent,
            }),
        }
    }
}

pub struct MetricsConsumer {
    aggregator: MetricsAggregator,
}

impl MetricsConsumer {
    pub fn new(aggregator: MetricsAggregator) -> Self {
        Self { aggregator }
    }

    pub fn aggregator(&self) -> &MetricsAggregator {
        &self.aggregator
    }

    pub fn flush(&self) -> Result<FlushReport, StoreError> {
        self.aggregator.flush()
    }
}

impl Consumer for MetricsConsumer {
    fn name(&self) -> &str {
        "metrics-aggregator"
    }

    fn handle(&self, envelope: &Envelope) -> Result<(), Fault> {
        self.aggregator.record(&envelope.log, Utc::now()).map(|_| ())
    }

    fn finish(&self) -> Result<(), StoreError> {
        let report = self.aggregator.flush()?;
        if report.failed > 0 {
            warn!(failed = report.failed, "metric windows left pending");
        }
        Ok(())
    }
}

pub struct IndexConsumer {
    indexer: Indexer,
}

impl IndexConsumer {
    pub fn new(indexer: Indexer) -> Self {
        Self { indexer }
    }
}

impl Consumer for IndexConsumer {
    fn name(&self) -> &str {
        "semantic-indexer"
    }

    fn handle(&self, envelope: &Envelope) -> Result<(), Fault> {
        match self.indexer.index(&envelope.log, &envelope.rule) {
            Ok(Some(doc)) => {
                debug!(id = %doc.id, "indexed");
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(Fault::IndexSkipped {
                id: envelope.log.identity_key().to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
