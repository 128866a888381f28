//! Repeated-failure detection over a trailing window, keyed by identity.
//! History lives in a [`PatternStore`]; it is pruned on every observation, before
//! the threshold is checked.

use super::{AlertBase, AnomalyAlert};
use crate::config::DetectorConfig;
use crate::error::Fault;
use crate::event::CanonicalEvent;
use crate::storage::PatternStore;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

pub struct PatternDetector {
    store: Arc<dyn PatternStore>,
    window: Duration,
    threshold: usize,
    failure_keywords: Vec<String>,
}

impl PatternDetector {
    pub fn new(config: &DetectorConfig, store: Arc<dyn PatternStore>) -> Self {
        Self {
            store,
            window: Duration::seconds(config.pattern_window_secs),
            threshold: config.pattern_threshold.max(1),
            failure_keywords: config
                .failure_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
        }
    }

    pub fn is_failure(&self, ev: &CanonicalEvent) -> bool {
        if ev.is_error_class() {
            return true;
        }
        let message = ev.message.as_deref().unwrap_or_default().to_lowercase();
        self.failure_keywords
            .iter()
            .any(|kw| message.contains(kw.as_str()))
    }

    /// Records the event and alerts whenever the key's pruned failure count is at
    /// the threshold or beyond, whether or not this event is itself a failure.
    pub fn observe(&self, ev: &CanonicalEvent, now: DateTime<Utc>) -> Result<Option<AnomalyAlert>, Fault> {
        let key = ev.identity_key();
        let failure = self.is_failure(ev);
        let count = self
            .store
            .record(key, now, self.window, failure)
            .map_err(|e| Fault::DetectionFault {
                strategy: "pattern",
                reason: e.to_string(),
            })?;

        if count < self.threshold {
            return Ok(None);
        }
        let minutes = self.window.num_minutes();
        Ok(Some(AnomalyAlert::Pattern {
            base: AlertBase::new(
                format!("Repeated failures for {key} in last {minutes} min"),
                ev,
                now,
            ),
            key: key.to_string(),
            failures: count,
            window_secs: self.window.num_seconds(),
        }))
    }
}
