//! Semantic indexing and brute-force cosine search.
//!
//! The indexer turns events into [`IndexedDocument`]s; search scans at most
//! `corpus_cap` of the most recently indexed documents per query. Documents past
//! the cap are not searchable.

mod index;
mod rank;

pub use index::{embedding_text, IndexedDocument, Indexer};
pub use rank::{cosine_similarity, rank, SearchHit, SemanticSearch};
