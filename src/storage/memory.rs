//! Process-local pattern history. Only correct when a single consumer instance
//! handles the subscription; scaled deployments use the sqlite store instead.

use super::PatternStore;
use crate::error::StoreError;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryPatternStore {
    history: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl MemoryPatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently holding at least one timestamp.
    pub fn tracked_keys(&self) -> usize {
        self.history.lock().map(|h| h.len()).unwrap_or(0)
    }
}

impl PatternStore for MemoryPatternStore {
    fn record(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        failure: bool,
    ) -> Result<usize, StoreError> {
        let mut history = self.history.lock().map_err(|_| StoreError::Poisoned)?;
        let cutoff = now - window;

        let count = {
            let entries = history.entry(key.to_string()).or_default();
            while entries.front().is_some_and(|ts| *ts <= cutoff) {
                entries.pop_front();
            }
            if failure {
                entries.push_back(now);
            }
            entries.len()
        };
        if count == 0 {
            history.remove(key);
        }
        Ok(count)
    }
}
