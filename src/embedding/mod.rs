//! Text embedding providers.
//!
//! [`HttpEmbedder`] calls an OpenAI-compatible `/embeddings` endpoint;
//! [`HashingEmbedder`] is deterministic and offline. Both return an empty vector
//! for empty text, which callers treat as "do not index".

mod hashing;
mod http;

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::error::EmbeddingError;
use std::sync::Arc;
use tracing::warn;

pub use hashing::HashingEmbedder;
pub use http::HttpEmbedder;

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Provider named by the config. An `http` provider that cannot be built falls
/// back to hashing so the pipeline still runs offline.
pub fn from_config(config: &EmbeddingConfig) -> Arc<dyn Embedder> {
    match config.provider {
        EmbeddingProvider::Hashing => Arc::new(HashingEmbedder::new(config.dimensions)),
        EmbeddingProvider::Http => match HttpEmbedder::new(config) {
            Ok(e) => Arc::new(e),
            Err(e) => {
                warn!(error = %e, "http embedder unavailable, using hashing embedder");
                Arc::new(HashingEmbedder::new(config.dimensions))
            }
        },
    }
}
