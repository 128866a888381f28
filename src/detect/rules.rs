//! Stateless rules: numeric thresholds on structured fields and keyword scan on free text.

use super::{AlertBase, AnomalyAlert};
use crate::config::DetectorConfig;
use crate::error::Fault;
use crate::event::CanonicalEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const EXCERPT_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredRule {
    HighCpu,
    CpuWithLatency,
    HighLatency,
    HighMemory,
    HighNetwork,
    Severity,
}

pub struct StructuredRules {
    cpu_high: f64,
    cpu_medium: f64,
    response_high: f64,
    response_medium: f64,
    memory_high: f64,
    bytes_in_high: f64,
    bytes_out_high: f64,
}

impl StructuredRules {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            cpu_high: config.cpu_high,
            cpu_medium: config.cpu_medium,
            response_high: config.response_high_ms,
            response_medium: config.response_medium_ms,
            memory_high: config.memory_high_mb,
            bytes_in_high: config.bytes_in_high,
            bytes_out_high: config.bytes_out_high,
        }
    }

    /// At most one threshold alert (first matching rule wins) plus at most one
    /// severity alert, which is judged independently.
    pub fn evaluate(&self, ev: &CanonicalEvent, now: DateTime<Utc>) -> Result<Vec<AnomalyAlert>, Fault> {
        let mut alerts = Vec::with_capacity(2);
        if let Some((rule, reason)) = self.threshold_match(ev)? {
            alerts.push(AnomalyAlert::Structured {
                base: AlertBase::new(reason, ev, now),
                rule,
            });
        }
        if ev.is_error_class() {
            alerts.push(AnomalyAlert::Structured {
                base: AlertBase::new(format!("High severity log: {}", ev.level_lower()), ev, now),
                rule: StructuredRule::Severity,
            });
        }
        Ok(alerts)
    }

    fn threshold_match(&self, ev: &CanonicalEvent) -> Result<Option<(StructuredRule, String)>, Fault> {
        let cpu = finite("cpuPercent", ev.cpu_percent)?;
        let resp = finite("responseMs", ev.response_ms)?;
        let mem = finite("memoryMb", ev.memory_mb)?;
        let bytes_in = finite("bytesIn", ev.bytes_in)?;
        let bytes_out = finite("bytesOut", ev.bytes_out)?;

        let hit = if cpu > self.cpu_high {
            Some((StructuredRule::HighCpu, format!("High CPU usage: {cpu}%")))
        } else if cpu > self.cpu_medium && resp > self.response_medium {
            Some((
                StructuredRule::CpuWithLatency,
                format!("CPU {cpu}% + response {resp}ms"),
            ))
        } else if resp > self.response_high {
            Some((StructuredRule::HighLatency, format!("High response time: {resp}ms")))
        } else if mem > self.memory_high {
            Some((StructuredRule::HighMemory, format!("High memory usage: {mem} MB")))
        } else if bytes_in > self.bytes_in_high || bytes_out > self.bytes_out_high {
            Some((
                StructuredRule::HighNetwork,
                format!("High network bytes in/out: {bytes_in}/{bytes_out}"),
            ))
        } else {
            None
        };
        Ok(hit)
    }
}

fn finite(field: &'static str, value: Option<f64>) -> Result<f64, Fault> {
    let v = value.unwrap_or(0.0);
    if v.is_finite() {
        Ok(v)
    } else {
        Err(Fault::DetectionFault {
            strategy: "structured",
            reason: format!("{field} is not a finite number"),
        })
    }
}

pub struct UnstructuredRules {
    keywords: Vec<String>,
}

impl UnstructuredRules {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            keywords: config
                .unstructured_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
        }
    }

    /// First keyword (in list order) found in the event's free text.
    pub fn evaluate(&self, ev: &CanonicalEvent, now: DateTime<Utc>) -> Result<Option<AnomalyAlert>, Fault> {
        let Some(text) = ev.unstructured_text() else {
            return Ok(None);
        };
        let lowered = text.to_lowercase();
        Ok(self
            .keywords
            .iter()
            .find(|kw| lowered.contains(kw.as_str()))
            .map(|kw| AnomalyAlert::Unstructured {
                base: AlertBase::new(format!("Keyword matched: {kw}"), ev, now),
                keyword: kw.clone(),
                excerpt: text.chars().take(EXCERPT_CHARS).collect(),
            }))
    }
}
