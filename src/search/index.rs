use crate::dedup::content_hash;
use crate::embedding::Embedder;
use crate::error::{Fault, StoreError};
use crate::event::{CanonicalEvent, LogParser};
use crate::storage::DocumentIndex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const RESERVED_KEYS: [&str; 3] = ["id", "logType", "logVector"];

/// An event as stored in the document index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedDocument {
    pub id: String,
    pub log_type: String,
    #[serde(flatten)]
    pub event: CanonicalEvent,
    pub log_vector: Vec<f32>,
}

/// Non-empty service, level and message joined by spaces. `-` placeholders are skipped.
pub fn embedding_text(ev: &CanonicalEvent) -> String {
    [&ev.service, &ev.level, &ev.message]
        .into_iter()
        .filter_map(|f| f.as_deref().map(str::trim))
        .filter(|s| !s.is_empty() && *s != "-")
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn DocumentIndex>,
    parser: LogParser,
}

impl Indexer {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn DocumentIndex>) -> Self {
        Self {
            embedder,
            index,
            parser: LogParser::new(),
        }
    }

    /// Embed and upsert one event. `Ok(None)` means the document was skipped
    /// (nothing to embed, or no usable vector); only index writes fail.
    pub fn index(&self, ev: &CanonicalEvent, log_type: &str) -> Result<Option<IndexedDocument>, StoreError> {
        let event = self.structure(ev);
        // content-addressed ids make redelivered events overwrite their document
        let id = match content_hash(&event) {
            Ok(h) => h,
            Err(e) => return Ok(self.skip("unhashable", e.to_string())),
        };

        let text = embedding_text(&event);
        if text.is_empty() {
            return Ok(self.skip(&id, "no text to embed".to_string()));
        }
        let vector = match self.embedder.embed(&text) {
            Ok(v) if v.is_empty() => return Ok(self.skip(&id, "empty embedding".to_string())),
            Ok(v) if v.iter().any(|x| !x.is_finite()) => {
                return Ok(self.skip(&id, "non-finite embedding".to_string()))
            }
            Ok(v) => v,
            Err(e) => return Ok(self.skip(&id, e.to_string())),
        };

        let doc = IndexedDocument {
            id,
            log_type: log_type.to_string(),
            event,
            log_vector: vector,
        };
        self.index.upsert(&doc)?;
        debug!(id = %doc.id, dims = doc.log_vector.len(), "document indexed");
        Ok(Some(doc))
    }

    /// Unstructured sources get level, service and message split out of the
    /// text, then numeric enrichment.
    fn structure(&self, ev: &CanonicalEvent) -> CanonicalEvent {
        let mut event = ev.clone();
        event.extra.retain(|k, _| !RESERVED_KEYS.contains(&k.as_str()));
        let Some(text) = event.unstructured_text().map(str::to_string) else {
            return event;
        };
        let parts = LogParser::split_structure(&text);
        event.level = event.level.or(parts.level);
        event.service = event.service.or(parts.service);
        if event.timestamp.is_none() {
            event.timestamp = parts.timestamp;
        }
        event.message = Some(parts.message);
        self.parser.enrich(event)
    }

    fn skip(&self, id: &str, reason: String) -> Option<IndexedDocument> {
        let fault = Fault::IndexSkipped {
            id: id.to_string(),
            reason,
        };
        warn!(error = %fault, "skipping document");
        None
    }
}
