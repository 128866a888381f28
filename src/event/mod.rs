//! Canonical event model shared by every stage, plus the raw-input parser.

mod fields;
mod parser;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub use fields::{FieldAliases, ALIASES};
pub use parser::{InputFormat, LogParser, ParsedBatch, TextParts};

const ERROR_CLASS_LEVELS: [&str; 4] = ["error", "critical", "warn", "warning"];

/// One normalized log record. Absent fields are meaningful and never defaulted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// ISO-8601 as received
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_in: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_out: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Original text of input that could not be structured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,

    /// Fields with no canonical slot, kept so content hashing sees the full record
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CanonicalEvent {
    /// Best-effort record for input that could not be parsed at all.
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            raw: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn message_only(text: impl Into<String>) -> Self {
        Self {
            message: Some(text.into()),
            ..Default::default()
        }
    }

    /// Build from a JSON object, resolving each canonical field through its alias list.
    /// The winning key is consumed; everything else lands in `extra`.
    pub fn from_json_object(mut obj: Map<String, Value>) -> Self {
        let mut ev = CanonicalEvent {
            service: take_string(&mut obj, ALIASES.service),
            level: take_string(&mut obj, ALIASES.level),
            message: take_string(&mut obj, ALIASES.message),
            timestamp: take_string(&mut obj, ALIASES.timestamp),
            cpu_percent: take_number(&mut obj, ALIASES.cpu_percent),
            memory_mb: take_number(&mut obj, ALIASES.memory_mb),
            response_ms: take_number(&mut obj, ALIASES.response_ms),
            bytes_in: take_number(&mut obj, ALIASES.bytes_in),
            bytes_out: take_number(&mut obj, ALIASES.bytes_out),
            user_id: take_string(&mut obj, ALIASES.user_id),
            client_ip: take_string(&mut obj, ALIASES.client_ip),
            host: take_string(&mut obj, ALIASES.host),
            pod: take_string(&mut obj, ALIASES.pod),
            namespace: take_string(&mut obj, ALIASES.namespace),
            transaction_id: take_string(&mut obj, ALIASES.transaction_id),
            amount: take_number(&mut obj, ALIASES.amount),
            currency: take_string(&mut obj, ALIASES.currency),
            error_code: take_string(&mut obj, ALIASES.error_code),
            component: take_string(&mut obj, ALIASES.component),
            tags: take_tags(&mut obj, ALIASES.tags),
            raw: take_string(&mut obj, ALIASES.raw),
            extra: BTreeMap::new(),
        };
        ev.extra = obj.into_iter().collect();
        ev
    }

    /// Any JSON value: objects are resolved field by field, anything else is kept as raw text.
    pub fn from_json_value(value: Value) -> Self {
        match value {
            Value::Object(obj) => Self::from_json_object(obj),
            Value::String(s) => Self::raw(s),
            other => Self::raw(other.to_string()),
        }
    }

    pub fn level_lower(&self) -> String {
        self.level.as_deref().unwrap_or_default().to_lowercase()
    }

    /// Level mentions error, critical or warn(ing).
    pub fn is_error_class(&self) -> bool {
        let level = self.level_lower();
        ERROR_CLASS_LEVELS.iter().any(|l| level.contains(l))
    }

    /// First present of user id, client ip, service; `"unknown"` otherwise.
    pub fn identity_key(&self) -> &str {
        [&self.user_id, &self.client_ip, &self.service]
            .into_iter()
            .find_map(|v| v.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or("unknown")
    }

    /// Free text with no recovered structure: the raw fallback, or a message that
    /// carries neither level nor service.
    pub fn unstructured_text(&self) -> Option<&str> {
        if let Some(raw) = self.raw.as_deref() {
            return Some(raw);
        }
        if self.level.is_none() && self.service.is_none() {
            return self.message.as_deref();
        }
        None
    }

    /// True when the record carries nothing but raw text.
    pub fn is_degraded(&self) -> bool {
        self.raw.is_some()
            && self.message.is_none()
            && self.level.is_none()
            && self.service.is_none()
    }

    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.timestamp.as_deref()?)
    }

    /// Sorted-key JSON; identical for records with the same field set regardless of input key order.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        // serde_json maps are ordered by key, so a round-trip through Value sorts every level
        let value = serde_json::to_value(self)?;
        serde_json::to_string(&value)
    }
}

/// RFC-3339, or a naive ISO datetime taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn take_first(obj: &mut Map<String, Value>, aliases: &[&str]) -> Option<Value> {
    let key = aliases
        .iter()
        .find(|k| obj.get(**k).map(|v| !is_blank(v)).unwrap_or(false))?;
    obj.remove(*key)
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn take_string(obj: &mut Map<String, Value>, aliases: &[&str]) -> Option<String> {
    match take_first(obj, aliases)? {
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn take_number(obj: &mut Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    let key = aliases.iter().find(|k| {
        obj.get(**k)
            .map(|v| value_as_f64(v).is_some())
            .unwrap_or(false)
    })?;
    obj.remove(*key).as_ref().and_then(value_as_f64)
}

fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn take_tags(obj: &mut Map<String, Value>, aliases: &[&str]) -> Vec<String> {
    match take_first(obj, aliases) {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect(),
        Some(other) => vec![other.to_string()],
        None => Vec::new(),
    }
}
