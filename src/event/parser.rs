//! Raw payload → canonical events. Nothing here fails: malformed input degrades
//! to a raw record instead of aborting the batch.

use super::CanonicalEvent;
use crate::error::{Fault, IngestError};
use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde_json::Value;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Text,
    /// A single JSON value or newline-delimited JSON
    Json,
}

impl FromStr for InputFormat {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(InputFormat::Text),
            "json" | "jsonl" | "ndjson" => Ok(InputFormat::Json),
            other => Err(IngestError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub events: Vec<CanonicalEvent>,
    /// Lines kept only as raw text
    pub degraded: usize,
}

/// `level`, `service`, `message` split out of a free-text line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextParts {
    pub timestamp: Option<String>,
    pub level: Option<String>,
    pub service: Option<String>,
    pub message: String,
}

struct Patterns {
    leading_ts: Regex,
    structure: Regex,
    embedded_ts: Regex,
    cpu: Regex,
    mem: Regex,
    resp: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        leading_ts: Regex::new(
            r"^\s*(\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?)\s*(.*)$",
        )
        .expect("leading timestamp pattern"),
        structure: Regex::new(
            r"(?i)^(TRACE|DEBUG|INFO|NOTICE|WARN|WARNING|ERROR|ERR|CRITICAL|CRIT|FATAL|ALERT|EMERG)\s+([^\s:]+):\s*(.*)$",
        )
        .expect("level/service pattern"),
        embedded_ts: Regex::new(r"(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?Z?)")
            .expect("embedded timestamp pattern"),
        cpu: Regex::new(r"(?i)cpu(?:_percent)?=(\d+(?:\.\d+)?)").expect("cpu pattern"),
        mem: Regex::new(r"(?i)mem(?:_mb)?=(\d+(?:\.\d+)?)").expect("mem pattern"),
        resp: Regex::new(r"(?i)resp(?:onse)?_ms=(\d+(?:\.\d+)?)").expect("resp pattern"),
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogParser;

impl LogParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, payload: &str, format: InputFormat) -> ParsedBatch {
        let mut batch = match format {
            InputFormat::Text => self.parse_text(payload),
            InputFormat::Json => self.parse_json(payload),
        };
        batch.events = batch.events.into_iter().map(|e| self.enrich(e)).collect();
        batch
    }

    fn parse_text(&self, payload: &str) -> ParsedBatch {
        let received = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let events = payload
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|line| {
                let mut ev = self.parse_text_line(line);
                if ev.timestamp.is_none() {
                    ev.timestamp = Some(received.clone());
                }
                ev
            })
            .collect();
        ParsedBatch {
            events,
            degraded: 0,
        }
    }

    /// One free-text line. Lines without the `<LEVEL> <service>: <message>` shape
    /// become message-only records.
    pub fn parse_text_line(&self, line: &str) -> CanonicalEvent {
        let parts = Self::split_structure(line);
        CanonicalEvent {
            timestamp: parts.timestamp,
            level: parts.level,
            service: parts.service,
            message: Some(parts.message),
            ..Default::default()
        }
    }

    pub fn split_structure(line: &str) -> TextParts {
        let p = patterns();
        let (timestamp, rest) = match p.leading_ts.captures(line) {
            Some(c) => (
                c.get(1).map(|m| m.as_str().to_string()),
                c.get(2).map(|m| m.as_str()).unwrap_or_default(),
            ),
            None => (None, line),
        };
        let rest = rest.trim();
        match p.structure.captures(rest) {
            Some(c) => TextParts {
                timestamp,
                level: Some(c[1].to_string()),
                service: Some(c[2].to_string()),
                message: c[3].to_string(),
            },
            None => TextParts {
                timestamp,
                level: None,
                service: None,
                message: rest.to_string(),
            },
        }
    }

    fn parse_json(&self, payload: &str) -> ParsedBatch {
        let payload = payload.trim();
        if payload.is_empty() {
            return ParsedBatch::default();
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => ParsedBatch {
                events: Self::flatten(value),
                degraded: 0,
            },
            Err(e) => {
                debug!(error = %e, "payload is not a single JSON value, parsing line by line");
                self.parse_json_lines(payload)
            }
        }
    }

    fn parse_json_lines(&self, payload: &str) -> ParsedBatch {
        let mut batch = ParsedBatch::default();
        for line in payload.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match serde_json::from_str::<Value>(line) {
                Ok(value) => batch.events.extend(Self::flatten(value)),
                Err(e) => {
                    debug!(fault = %Fault::ParseDegraded(e.to_string()), "keeping line as raw text");
                    batch.degraded += 1;
                    batch.events.push(CanonicalEvent::raw(line));
                }
            }
        }
        batch
    }

    fn flatten(value: Value) -> Vec<CanonicalEvent> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(CanonicalEvent::from_json_value)
                .collect(),
            other => vec![CanonicalEvent::from_json_value(other)],
        }
    }

    /// Recover numeric fields and an embedded timestamp from the message text.
    /// Fields already present are left alone.
    pub fn enrich(&self, mut ev: CanonicalEvent) -> CanonicalEvent {
        let Some(text) = ev.message.clone().or_else(|| ev.raw.clone()) else {
            return ev;
        };
        let p = patterns();
        let capture_f64 =
            |re: &Regex| re.captures(&text).and_then(|c| c[1].parse::<f64>().ok());

        if ev.timestamp.is_none() {
            ev.timestamp = p.embedded_ts.captures(&text).map(|c| c[1].to_string());
        }
        if ev.cpu_percent.is_none() {
            ev.cpu_percent = capture_f64(&p.cpu);
        }
        if ev.memory_mb.is_none() {
            ev.memory_mb = capture_f64(&p.mem);
        }
        if ev.response_ms.is_none() {
            ev.response_ms = capture_f64(&p.resp);
        }
        ev
    }
}
