//! Read-side queries over persisted windows.

use super::window::MetricWindow;
use crate::error::StoreError;
use crate::storage::MetricsStore;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Windows scanned for per-service aggregates.
const SERVICE_SCAN_LIMIT: usize = 10_000;

pub struct MetricsReport {
    store: Arc<dyn MetricsStore>,
    error_rate_threshold: f64,
}

impl MetricsReport {
    pub fn new(store: Arc<dyn MetricsStore>, error_rate_threshold: f64) -> Self {
        Self {
            store,
            error_rate_threshold,
        }
    }

    pub fn latest(&self, top: usize) -> Result<Vec<MetricWindow>, StoreError> {
        self.store.windows(None, top)
    }

    /// Windows whose error rate is above the alerting threshold, newest first.
    pub fn anomalies(&self, top: usize) -> Result<Vec<MetricWindow>, StoreError> {
        Ok(self
            .store
            .windows(None, SERVICE_SCAN_LIMIT)?
            .into_iter()
            .filter(|w| w.error_rate_percent > self.error_rate_threshold)
            .take(top)
            .collect())
    }

    pub fn by_service(&self, service: &str, top: usize) -> Result<Vec<MetricWindow>, StoreError> {
        self.store.windows(Some(service), top)
    }

    /// Mean CPU across all of the service's events (not a mean of window means).
    pub fn avg_cpu(&self, service: &str) -> Result<f64, StoreError> {
        self.weighted_mean(service, |w| w.cpu_sum)
    }

    pub fn avg_memory(&self, service: &str) -> Result<f64, StoreError> {
        self.weighted_mean(service, |w| w.memory_sum)
    }

    pub fn max_latency(&self, service: &str) -> Result<f64, StoreError> {
        Ok(self
            .service_windows(service)?
            .iter()
            .map(|w| w.max_latency)
            .fold(0.0, f64::max))
    }

    /// `(window id, error rate)` newest first.
    pub fn error_rates(&self, service: &str) -> Result<Vec<(String, f64)>, StoreError> {
        Ok(self
            .service_windows(service)?
            .into_iter()
            .map(|w| (w.id, w.error_rate_percent))
            .collect())
    }

    /// Users with the most requests across the service's windows; ties by user id.
    pub fn top_users(&self, service: &str, top: usize) -> Result<Vec<(String, u64)>, StoreError> {
        let mut totals: BTreeMap<String, u64> = BTreeMap::new();
        for w in self.service_windows(service)? {
            for (user, n) in w.user_requests {
                *totals.entry(user).or_default() += n;
            }
        }
        let mut ranked: Vec<(String, u64)> = totals.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(top);
        Ok(ranked)
    }

    fn service_windows(&self, service: &str) -> Result<Vec<MetricWindow>, StoreError> {
        self.store.windows(Some(service), SERVICE_SCAN_LIMIT)
    }

    fn weighted_mean(&self, service: &str, sum: impl Fn(&MetricWindow) -> f64) -> Result<f64, StoreError> {
        let windows = self.service_windows(service)?;
        let total: u64 = windows.iter().map(|w| w.total_logs).sum();
        if total == 0 {
            return Ok(0.0);
        }
        Ok(windows.iter().map(sum).sum::<f64>() / total as f64)
    }
}
