//! # Gateway Telemetry
//!
//! Observability and spend control for the governance layer.
//!
//! This crate provides:
//! - The append-only request metrics log with windowed aggregates
//! - Prometheus collectors for requests, latency, cache lookups and rejections
//! - Spend tracking with monthly budget alerts
//! - Cost analysis reports
//! - Logging and OpenTelemetry tracing setup

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cost;
pub mod error;
pub mod metrics;
pub mod report;
pub mod tracing_setup;

// Re-export main types
pub use cost::{
    days_in_month, AlertSeverity, Budget, BudgetAlert, BudgetStatus, CostRecord, CostTracker,
    PricingTable,
};
pub use error::{TelemetryError, TelemetryResult};
pub use metrics::{
    parse_jsonl, percentile, read_jsonl, summarize, DailyCount, LatencyStats, MetricEntry,
    MetricsConfig, MetricsService, MetricsSummary,
};
pub use report::{
    BudgetVerification, CostAnalysisReport, CostDistribution, Level, OpportunityCategory,
    OptimizationOpportunity,
};
pub use tracing_setup::{init_tracing, shutdown_tracing, TracingConfig, TracingError};
