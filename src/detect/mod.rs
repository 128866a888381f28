//! Anomaly detection: three independent strategies over the same event stream.
//!
//! - [`rules`]: numeric thresholds and severity (structured) and keyword scan (unstructured)
//! - [`pattern`]: repeated failures per identity inside a trailing window

mod pattern;
mod rules;

use crate::config::DetectorConfig;
use crate::error::Fault;
use crate::event::CanonicalEvent;
use crate::storage::PatternStore;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

pub use pattern::PatternDetector;
pub use rules::{StructuredRule, StructuredRules, UnstructuredRules};

/// Fields every alert carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertBase {
    pub id: String,
    pub detected_reason: String,
    pub detected_at: String,
    pub event: CanonicalEvent,
}

impl AlertBase {
    pub fn new(reason: impl Into<String>, event: &CanonicalEvent, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            detected_reason: reason.into(),
            detected_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            event: event.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "alertType")]
pub enum AnomalyAlert {
    #[serde(rename = "STRUCTURED_ANOMALY")]
    Structured {
        #[serde(flatten)]
        base: AlertBase,
        rule: StructuredRule,
    },
    #[serde(rename = "UNSTRUCTURED_ANOMALY")]
    Unstructured {
        #[serde(flatten)]
        base: AlertBase,
        keyword: String,
        excerpt: String,
    },
    #[serde(rename = "PATTERN_ANOMALY")]
    Pattern {
        #[serde(flatten)]
        base: AlertBase,
        key: String,
        failures: usize,
        #[serde(rename = "windowSecs")]
        window_secs: i64,
    },
}

impl AnomalyAlert {
    pub fn base(&self) -> &AlertBase {
        match self {
            AnomalyAlert::Structured { base, .. }
            | AnomalyAlert::Unstructured { base, .. }
            | AnomalyAlert::Pattern { base, .. } => base,
        }
    }

    pub fn reason(&self) -> &str {
        &self.base().detected_reason
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AnomalyAlert::Structured { .. } => "structured",
            AnomalyAlert::Unstructured { .. } => "unstructured",
            AnomalyAlert::Pattern { .. } => "pattern",
        }
    }
}

pub struct AnomalyDetector {
    structured: StructuredRules,
    unstructured: UnstructuredRules,
    pattern: PatternDetector,
}

impl AnomalyDetector {
    pub fn new(config: &DetectorConfig, pattern_store: Arc<dyn PatternStore>) -> Self {
        Self {
            structured: StructuredRules::new(config),
            unstructured: UnstructuredRules::new(config),
            pattern: PatternDetector::new(config, pattern_store),
        }
    }

    /// Run every strategy. A failing strategy is logged and skipped; the others
    /// still run.
    pub fn evaluate(&self, ev: &CanonicalEvent, now: DateTime<Utc>) -> Vec<AnomalyAlert> {
        let mut alerts = Vec::new();
        let outcomes: [(&str, Result<Vec<AnomalyAlert>, Fault>); 3] = [
            ("structured", self.structured.evaluate(ev, now)),
            (
                "unstructured",
                self.unstructured.evaluate(ev, now).map(Vec::from_iter),
            ),
            ("pattern", self.pattern.observe(ev, now).map(Vec::from_iter)),
        ];
        for (strategy, outcome) in outcomes {
            match outcome {
                Ok(found) => alerts.extend(found),
                Err(e) => warn!(strategy, error = %e, "detection strategy failed"),
            }
        }
        alerts
    }
}
