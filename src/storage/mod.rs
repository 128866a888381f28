//! Shared keyed stores behind every stateful stage.
//!
//! State that must agree across horizontally scaled consumers (dedup hashes,
//! metric windows, pattern history, indexed documents) goes through these traits
//! rather than process-local maps. [`SqliteStore`] implements all of them over one
//! database file that several processes can open; [`MemoryPatternStore`] is the
//! single-instance pattern store.

mod blob;
mod memory;
mod sqlite;

use crate::error::StoreError;
use crate::metrics::MetricWindow;
use crate::search::IndexedDocument;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

pub use blob::DirBlobSink;
pub use memory::MemoryPatternStore;
pub use sqlite::SqliteStore;

/// Content hashes already forwarded, per log type.
pub trait DedupStore: Send + Sync {
    fn load_hashes(&self, log_type: &str) -> Result<HashSet<String>, StoreError>;
    /// Adds `hashes` to the stored set; the result is old ∪ new.
    fn persist_hashes(&self, log_type: &str, hashes: &HashSet<String>) -> Result<(), StoreError>;
    /// Drops the log type's set. Succeeds when nothing was stored.
    fn reset(&self, log_type: &str) -> Result<(), StoreError>;
}

/// Windows addressed by `MetricWindow::id`.
pub trait MetricsStore: Send + Sync {
    fn get_window(&self, id: &str) -> Result<Option<MetricWindow>, StoreError>;
    /// Atomically folds `delta` into the stored window (creating it if absent) and
    /// returns the merged result.
    fn merge_window(&self, delta: &MetricWindow) -> Result<MetricWindow, StoreError>;
    /// Newest window first, optionally for one service.
    fn windows(&self, service: Option<&str>, limit: usize) -> Result<Vec<MetricWindow>, StoreError>;
}

/// Failure timestamps per identity key, expiring after the trailing window.
pub trait PatternStore: Send + Sync {
    /// Prunes `key` to entries newer than `now - window`, appends `now` when
    /// `failure` is set, and returns the count after both steps.
    fn record(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        failure: bool,
    ) -> Result<usize, StoreError>;
}

pub trait DocumentIndex: Send + Sync {
    fn upsert(&self, doc: &IndexedDocument) -> Result<(), StoreError>;
    /// At most `limit` documents, most recently indexed first.
    fn fetch(&self, limit: usize) -> Result<Vec<IndexedDocument>, StoreError>;
}

/// Named text objects.
pub trait BlobSink: Send + Sync {
    fn read(&self, name: &str) -> Result<Option<String>, StoreError>;
    fn write(&self, name: &str, body: &str) -> Result<(), StoreError>;

    /// Read, append, write back. No locking: concurrent appenders race and the
    /// last writer wins.
    fn append(&self, name: &str, text: &str) -> Result<(), StoreError> {
        let mut body = self.read(name)?.unwrap_or_default();
        body.push_str(text);
        self.write(name, &body)
    }
}
