//! Synchronous front half of the pipeline: parse, deduplicate, publish.

use crate::dedup::DedupCache;
use crate::dispatch::{Dispatcher, PublishResult, PublishStatus};
use crate::error::IngestError;
use crate::event::{InputFormat, LogParser};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    /// Forward every parsed event without consulting the cache
    pub skip_dedup: bool,
    /// Drop the log type's cache before filtering
    pub reset_cache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Nothing new to publish
    Skipped,
    Success,
    Partial,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub status: IngestStatus,
    pub log_type: String,
    pub parsed: usize,
    pub unique: usize,
    pub duplicates: usize,
    pub degraded: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup_warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishResult>,
}

pub struct Ingestor {
    parser: LogParser,
    dedup: DedupCache,
    dedup_enabled: bool,
    dispatcher: Dispatcher,
}

impl Ingestor {
    pub fn new(dedup: DedupCache, dedup_enabled: bool, dispatcher: Dispatcher) -> Self {
        Self {
            parser: LogParser::new(),
            dedup,
            dedup_enabled,
            dispatcher,
        }
    }

    pub fn ingest(
        &self,
        payload: &str,
        log_type: &str,
        format: &str,
        options: IngestOptions,
    ) -> Result<IngestReport, IngestError> {
        let format: InputFormat = format.parse()?;
        if options.reset_cache {
            self.dedup.reset(log_type)?;
            info!(log_type, "dedup cache reset");
        }

        let parsed = self.parser.parse(payload, format);
        let mut report = IngestReport {
            status: IngestStatus::Skipped,
            log_type: log_type.to_string(),
            parsed: parsed.events.len(),
            unique: 0,
            duplicates: 0,
            degraded: parsed.degraded,
            dedup_warning: None,
            publish: None,
        };

        let unique = if options.skip_dedup || !self.dedup_enabled {
            parsed.events
        } else {
            let outcome = self.dedup.filter_new(parsed.events, log_type);
            report.duplicates = outcome.duplicates;
            report.dedup_warning = outcome.persist_fault.map(|f| f.to_string());
            outcome.unique
        };
        report.unique = unique.len();

        if unique.is_empty() {
            info!(log_type, parsed = report.parsed, "no new events to publish");
            return Ok(report);
        }

        let result = self.dispatcher.publish(&unique, log_type);
        report.status = match result.status {
            PublishStatus::Success => IngestStatus::Success,
            PublishStatus::Skipped => IngestStatus::Skipped,
            PublishStatus::Partial => IngestStatus::Partial,
            PublishStatus::Failed => IngestStatus::Error,
        };
        if report.status == IngestStatus::Error {
            warn!(log_type, error = ?result.error, "publish failed");
        }
        report.publish = Some(result);
        Ok(report)
    }

    pub fn reset_cache(&self, log_type: &str) -> Result<(), IngestError> {
        self.dedup.reset(log_type)?;
        Ok(())
    }
}
