//! Per-service, per-minute metrics: aggregation, flush and queries.

mod aggregator;
mod report;
mod window;

pub use aggregator::{FlushReport, MetricsAggregator};
pub use report::MetricsReport;
pub use window::{LevelClass, MetricContribution, MetricWindow, WindowKey};
