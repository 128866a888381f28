//! Content-addressed deduplication per log type.

use crate::error::{Fault, StoreError};
use crate::event::CanonicalEvent;
use crate::storage::DedupStore;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// SHA-256 hex digest of the event's sorted-key serialization.
pub fn content_hash(ev: &CanonicalEvent) -> Result<String, serde_json::Error> {
    let canonical = ev.canonical_json()?;
    let mut h = Sha256::new();
    h.update(canonical.as_bytes());
    Ok(format!("{:x}", h.finalize()))
}

#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub unique: Vec<CanonicalEvent>,
    pub duplicates: usize,
    /// Set when the updated hash set could not be stored. `unique` is still valid.
    pub persist_fault: Option<Fault>,
}

pub struct DedupCache {
    store: Arc<dyn DedupStore>,
}

impl DedupCache {
    pub fn new(store: Arc<dyn DedupStore>) -> Self {
        Self { store }
    }

    /// Events whose hash was not seen before for `log_type`, in input order.
    /// Repeats inside the batch count as duplicates too.
    pub fn filter_new(&self, events: Vec<CanonicalEvent>, log_type: &str) -> DedupOutcome {
        let seen = match self.store.load_hashes(log_type) {
            Ok(seen) => seen,
            Err(e) => {
                warn!(log_type, error = %e, "dedup cache unavailable, forwarding batch unfiltered");
                HashSet::new()
            }
        };

        let mut fresh = HashSet::new();
        let mut outcome = DedupOutcome::default();
        for ev in events {
            let hash = match content_hash(&ev) {
                Ok(h) => h,
                Err(e) => {
                    warn!(log_type, error = %e, "event not hashable, forwarding");
                    outcome.unique.push(ev);
                    continue;
                }
            };
            if seen.contains(&hash) || !fresh.insert(hash) {
                outcome.duplicates += 1;
                continue;
            }
            outcome.unique.push(ev);
        }

        debug!(
            log_type,
            unique = outcome.unique.len(),
            duplicates = outcome.duplicates,
            "dedup filtered batch"
        );

        if !fresh.is_empty() {
            if let Err(source) = self.store.persist_hashes(log_type, &fresh) {
                let fault = Fault::DedupPersistenceFailed {
                    log_type: log_type.to_string(),
                    source,
                };
                warn!(error = %fault, "forwarding batch without persisted hashes");
                outcome.persist_fault = Some(fault);
            }
        }
        outcome
    }

    pub fn reset(&self, log_type: &str) -> Result<(), StoreError> {
        self.store.reset(log_type)
    }
}
