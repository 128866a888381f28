//! Per-(service, minute) aggregation record.

use crate::event::CanonicalEvent;
use chrono::{DateTime, Duration, DurationRound, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub service: String,
    pub minute: DateTime<Utc>,
}

impl WindowKey {
    /// Minute bucket of `ts`.
    pub fn new(service: impl Into<String>, ts: DateTime<Utc>) -> Self {
        let minute = ts.duration_trunc(Duration::minutes(1)).unwrap_or(ts);
        Self {
            service: service.into(),
            minute,
        }
    }

    /// Durable identity, e.g. `payments-2025-11-09-08-27`.
    pub fn id(&self) -> String {
        format!("{}-{}", self.service, self.minute.format("%Y-%m-%d-%H-%M"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelClass {
    Error,
    Warning,
    Other,
}

impl LevelClass {
    fn of(level: &str) -> Self {
        match level {
            "error" | "err" | "critical" | "crit" | "fatal" => LevelClass::Error,
            "warning" | "warn" => LevelClass::Warning,
            _ => LevelClass::Other,
        }
    }
}

/// What one event adds to its window. Derived from the event, which stays untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricContribution {
    pub key: WindowKey,
    pub level: LevelClass,
    pub cpu: f64,
    pub memory: f64,
    pub latency: f64,
    pub bytes_in: f64,
    pub bytes_out: f64,
    pub amount: Option<f64>,
    pub user: String,
    pub error_code: Option<String>,
    pub component: Option<String>,
    pub namespace: Option<String>,
}

impl MetricContribution {
    /// Window from `service` (or `unknown`) and the event timestamp, falling back to
    /// `now` when the timestamp is absent or unparsable.
    pub fn from_event(ev: &CanonicalEvent, now: DateTime<Utc>) -> Self {
        let service = ev
            .service
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        let ts = ev.timestamp_utc().unwrap_or(now);
        Self {
            key: WindowKey::new(service, ts),
            level: LevelClass::of(&ev.level_lower()),
            cpu: ev.cpu_percent.unwrap_or(0.0),
            memory: ev.memory_mb.unwrap_or(0.0),
            latency: ev.response_ms.unwrap_or(0.0),
            bytes_in: ev.bytes_in.unwrap_or(0.0),
            bytes_out: ev.bytes_out.unwrap_or(0.0),
            amount: ev.amount,
            user: ev.user_id.clone().unwrap_or_else(|| "unknown".to_string()),
            error_code: ev.error_code.clone().filter(|s| !s.is_empty()),
            component: ev.component.clone().filter(|s| !s.is_empty()),
            namespace: ev.namespace.clone().filter(|s| !s.is_empty()),
        }
    }

    /// Name of the first non-finite numeric field, if any.
    pub fn non_finite_field(&self) -> Option<&'static str> {
        [
            ("cpuPercent", self.cpu),
            ("memoryMb", self.memory),
            ("responseMs", self.latency),
            ("bytesIn", self.bytes_in),
            ("bytesOut", self.bytes_out),
            ("amount", self.amount.unwrap_or(0.0)),
        ]
        .into_iter()
        .find(|(_, v)| !v.is_finite())
        .map(|(name, _)| name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricWindow {
    pub id: String,
    pub service: String,
    pub window_start: String,

    pub total_logs: u64,
    pub error_logs: u64,
    pub warning_logs: u64,

    pub cpu_sum: f64,
    pub max_cpu: f64,
    pub memory_sum: f64,
    pub max_memory: f64,
    pub latency_sum: f64,
    pub max_latency: f64,
    pub bytes_in: f64,
    pub bytes_out: f64,

    pub transactions_sum: f64,
    pub transactions_count: u64,

    pub user_requests: BTreeMap<String, u64>,
    pub error_code_freq: BTreeMap<String, u64>,
    pub component_count: BTreeMap<String, u64>,
    pub namespace_count: BTreeMap<String, u64>,
    pub semantic_anomalies: u64,

    // derived; only written by `recompute`
    pub avg_cpu: f64,
    pub avg_memory: f64,
    pub avg_latency: f64,
    pub error_rate_percent: f64,
    pub throughput_per_min: u64,
}

impl MetricWindow {
    pub fn new(key: &WindowKey) -> Self {
        Self {
            id: key.id(),
            service: key.service.clone(),
            window_start: key.minute.to_rfc3339_opts(SecondsFormat::Secs, true),
            ..Default::default()
        }
    }

    pub fn apply(&mut self, c: &MetricContribution) {
        self.total_logs += 1;
        match c.level {
            LevelClass::Error => self.error_logs += 1,
            LevelClass::Warning => self.warning_logs += 1,
            LevelClass::Other => {}
        }

        self.cpu_sum += c.cpu;
        self.max_cpu = self.max_cpu.max(c.cpu);
        self.memory_sum += c.memory;
        self.max_memory = self.max_memory.max(c.memory);
        self.latency_sum += c.latency;
        self.max_latency = self.max_latency.max(c.latency);
        self.bytes_in += c.bytes_in;
        self.bytes_out += c.bytes_out;

        if let Some(amount) = c.amount {
            self.transactions_sum += amount;
            self.transactions_count += 1;
        }

        *self.user_requests.entry(c.user.clone()).or_default() += 1;
        if let Some(code) = &c.error_code {
            *self.error_code_freq.entry(code.clone()).or_default() += 1;
        }
        if let Some(comp) = &c.component {
            *self.component_count.entry(comp.clone()).or_default() += 1;
        }
        if let Some(ns) = &c.namespace {
            *self.namespace_count.entry(ns.clone()).or_default() += 1;
        }

        self.recompute();
    }

    /// Fold another partial of the same window into this one.
    pub fn merge(&mut self, other: &MetricWindow) {
        self.total_logs += other.total_logs;
        self.error_logs += other.error_logs;
        self.warning_logs += other.warning_logs;

        self.cpu_sum += other.cpu_sum;
        self.max_cpu = self.max_cpu.max(other.max_cpu);
        self.memory_sum += other.memory_sum;
        self.max_memory = self.max_memory.max(other.max_memory);
        self.latency_sum += other.latency_sum;
        self.max_latency = self.max_latency.max(other.max_latency);
        self.bytes_in += other.bytes_in;
        self.bytes_out += other.bytes_out;

        self.transactions_sum += other.transactions_sum;
        self.transactions_count += other.transactions_count;
        self.semantic_anomalies += other.semantic_anomalies;

        merge_counts(&mut self.user_requests, &other.user_requests);
        merge_counts(&mut self.error_code_freq, &other.error_code_freq);
        merge_counts(&mut self.component_count, &other.component_count);
        merge_counts(&mut self.namespace_count, &other.namespace_count);

        self.recompute();
    }

    pub fn recompute(&mut self) {
        let total = self.total_logs.max(1) as f64;
        self.avg_cpu = self.cpu_sum / total;
        self.avg_memory = self.memory_sum / total;
        self.avg_latency = self.latency_sum / total;
        self.error_rate_percent = self.error_logs as f64 / total * 100.0;
        self.throughput_per_min = self.total_logs;
    }

    pub fn is_empty(&self) -> bool {
        self.total_logs == 0
    }
}

fn merge_counts(into: &mut BTreeMap<String, u64>, from: &BTreeMap<String, u64>) {
    for (k, v) in from {
        *into.entry(k.clone()).or_default() += v;
    }
}
