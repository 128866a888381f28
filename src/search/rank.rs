use super::IndexedDocument;
use crate::config::SearchConfig;
use crate::embedding::Embedder;
use crate::error::{Fault, StoreError};
use crate::storage::DocumentIndex;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub similarity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl From<(&IndexedDocument, f64)> for SearchHit {
    fn from((doc, similarity): (&IndexedDocument, f64)) -> Self {
        Self {
            id: doc.id.clone(),
            similarity,
            service: doc.event.service.clone(),
            level: doc.event.level.clone(),
            message: doc.event.message.clone().or_else(|| doc.event.raw.clone()),
            timestamp: doc.event.timestamp.clone(),
        }
    }
}

/// Cosine similarity, or an explanation of why it is undefined.
fn try_cosine(a: &[f32], b: &[f32]) -> Result<f64, &'static str> {
    if a.len() != b.len() {
        return Err("dimension mismatch");
    }
    let a = ArrayView1::from(a).mapv(f64::from);
    let b = ArrayView1::from(b).mapv(f64::from);
    let denom = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    if denom == 0.0 {
        return Err("zero norm");
    }
    let sim = a.dot(&b) / denom;
    if sim.is_finite() {
        Ok(sim)
    } else {
        Err("non-finite similarity")
    }
}

/// 0.0 when either vector has zero norm or the dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    try_cosine(a, b).unwrap_or(0.0)
}

/// Top `top_k` documents by similarity to `query`, best first. Ties keep corpus order.
pub fn rank<'a>(query: &[f32], docs: &'a [IndexedDocument], top_k: usize) -> Vec<(&'a IndexedDocument, f64)> {
    let mut scored: Vec<_> = docs
        .iter()
        .map(|doc| {
            let sim = try_cosine(query, &doc.log_vector).unwrap_or_else(|reason| {
                let fault = Fault::SearchDegraded {
                    id: doc.id.clone(),
                    reason: reason.to_string(),
                };
                debug!(error = %fault, "scoring as zero");
                0.0
            });
            (doc, sim)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(top_k);
    scored
}

pub struct SemanticSearch {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn DocumentIndex>,
    corpus_cap: usize,
    max_top_k: usize,
}

impl SemanticSearch {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn DocumentIndex>, config: &SearchConfig) -> Self {
        Self {
            embedder,
            index,
            corpus_cap: config.corpus_cap,
            max_top_k: config.max_top_k.max(1),
        }
    }

    /// An empty result means nothing matched or the query could not be embedded.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, StoreError> {
        let query_vec = match self.embedder.embed(query) {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => return Ok(Vec::new()),
            Err(e) => {
                info!(error = %e, "query embedding failed");
                return Ok(Vec::new());
            }
        };
        let docs = self.index.fetch(self.corpus_cap)?;
        let top_k = top_k.clamp(1, self.max_top_k);
        let hits: Vec<SearchHit> = rank(&query_vec, &docs, top_k)
            .into_iter()
            .map(SearchHit::from)
            .collect();
        info!(corpus = docs.len(), hits = hits.len(), "search complete");
        Ok(hits)
    }
}
