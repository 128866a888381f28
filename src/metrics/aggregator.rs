//! Windowed aggregation with batched, merge-on-write persistence.
//!
//! Each touched window keeps two copies in process: the `view` (stored state plus
//! everything applied locally, used for derived metrics and alerting) and the
//! `delta` (contributions not yet flushed). A flush merges each delta into the
//! shared store atomically, so instances consuming the same subscription add up
//! instead of overwriting each other, and replaces the view with the merged
//! result.

use super::window::{MetricContribution, MetricWindow};
use crate::config::MetricsConfig;
use crate::error::{Fault, StoreError};
use crate::event::CanonicalEvent;
use crate::storage::{BlobSink, MetricsStore};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Windows older than this (relative to the newest bucket seen) are dropped from
/// the local cache once they have nothing pending.
const VIEW_RETENTION_MINUTES: i64 = 2;

struct CachedWindow {
    view: MetricWindow,
    minute: DateTime<Utc>,
}

#[derive(Default)]
struct AggregatorState {
    views: HashMap<String, CachedWindow>,
    pending: HashMap<String, MetricWindow>,
    newest_minute: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub failed: usize,
}

pub struct MetricsAggregator {
    config: MetricsConfig,
    store: Arc<dyn MetricsStore>,
    alerts: Arc<dyn BlobSink>,
    state: Mutex<AggregatorState>,
}

impl MetricsAggregator {
    pub fn new(config: MetricsConfig, store: Arc<dyn MetricsStore>, alerts: Arc<dyn BlobSink>) -> Self {
        Self {
            config,
            store,
            alerts,
            state: Mutex::new(AggregatorState::default()),
        }
    }

    /// Apply one event to its window. On failure the window keeps its last good state
    /// and the event is not retried.
    pub fn record(&self, ev: &CanonicalEvent, now: DateTime<Utc>) -> Result<MetricWindow, Fault> {
        let contribution = MetricContribution::from_event(ev, now);
        let window_id = contribution.key.id();
        let fault = |reason: String| Fault::AggregationFault {
            window: window_id.clone(),
            reason,
        };

        if let Some(field) = contribution.non_finite_field() {
            return Err(fault(format!("non-finite {field}")));
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| fault("aggregator lock poisoned".to_string()))?;

        let mut view = match state.views.get(&window_id) {
            Some(cached) => cached.view.clone(),
            None => self
                .store
                .get_window(&window_id)
                .map_err(|e| fault(e.to_string()))?
                .unwrap_or_else(|| MetricWindow::new(&contribution.key)),
        };
        view.apply(&contribution);

        state
            .pending
            .entry(window_id.clone())
            .or_insert_with(|| MetricWindow::new(&contribution.key))
            .apply(&contribution);
        state.views.insert(
            window_id.clone(),
            CachedWindow {
                view: view.clone(),
                minute: contribution.key.minute,
            },
        );
        state.newest_minute = state.newest_minute.max(Some(contribution.key.minute));

        if view.error_rate_percent > self.config.error_rate_threshold_percent {
            self.log_alert(&view, contribution.key.minute);
        }
        debug!(window = %window_id, total = view.total_logs, "metrics updated");

        if state.pending.len() >= self.config.batch_write_limit {
            self.flush_locked(&mut state);
        }
        Ok(view)
    }

    /// Persist every pending window now.
    pub fn flush(&self) -> Result<FlushReport, StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(self.flush_locked(&mut state))
    }

    fn flush_locked(&self, state: &mut AggregatorState) -> FlushReport {
        let mut report = FlushReport::default();
        let pending = std::mem::take(&mut state.pending);
        for (id, delta) in pending {
            match self.store.merge_window(&delta) {
                Ok(merged) => {
                    report.written += 1;
                    if let Some(cached) = state.views.get_mut(&id) {
                        cached.view = merged;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(window = %id, error = %e, "metric window flush failed; kept for next flush");
                    state.pending.insert(id, delta);
                }
            }
        }

        if let Some(newest) = state.newest_minute {
            let cutoff = newest - Duration::minutes(VIEW_RETENTION_MINUTES);
            let pending = &state.pending;
            state
                .views
                .retain(|id, cached| cached.minute >= cutoff || pending.contains_key(id));
        }
        info!(written = report.written, failed = report.failed, "metric windows flushed");
        report
    }

    fn log_alert(&self, window: &MetricWindow, minute: DateTime<Utc>) {
        let line = format!(
            "ALERT: Service {} exceeded error threshold! Error rate: {:.2}% | Time window: {}\n",
            window.service, window.error_rate_percent, window.id
        );
        let blob = format!("{}_{}.log", window.service, minute.format("%Y-%m-%d"));
        if let Err(e) = self.alerts.append(&blob, &line) {
            warn!(blob = %blob, error = %e, "failed to append error-rate alert");
        }
        warn!(
            service = %window.service,
            window = %window.id,
            error_rate = window.error_rate_percent,
            "error rate above threshold"
        );
    }

    pub fn pending_windows(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    /// Local view of a window, if cached.
    pub fn window(&self, id: &str) -> Option<MetricWindow> {
        let state = self.state.lock().ok()?;
        state.views.get(id).map(|c| c.view.clone())
    }
}
