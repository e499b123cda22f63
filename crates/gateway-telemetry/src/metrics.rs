//! Request outcome log and aggregates.
//!
//! Every governed request produces exactly one [`MetricEntry`]. The log is
//! append-only; aggregates filter it by `timestamp ∈ [now − window, now]`.
//! Admission rejections (rate limit, open circuit) never reach the log and
//! are counted only by the Prometheus `rejections_total` collector.

use crate::error::{TelemetryError, TelemetryResult};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use gateway_core::{Clock, ErrorKind, Identity, LatencyEstimator, Operation, Tier};
use parking_lot::{Mutex, RwLock};
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// One governed request outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    /// Unique entry id
    pub id: Uuid,
    /// Completion time
    pub timestamp: DateTime<Utc>,
    /// Operation class
    pub operation: Operation,
    /// Model the request was routed to
    pub model: String,
    /// Caller id
    pub identity_id: String,
    /// Caller tier
    pub tier: Tier,
    /// End-to-end latency in milliseconds
    pub latency_ms: u64,
    /// Tokens consumed by the backend
    pub tokens_used: u64,
    /// Cost in USD
    pub cost: f64,
    /// Whether the response was served from cache
    pub cache_hit: bool,
    /// Whether the request succeeded
    pub success: bool,
    /// Failure class for unsuccessful requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Backend attempts made
    #[serde(default)]
    pub attempts: u32,
}

impl MetricEntry {
    /// Create a successful entry with zero latency, tokens and cost
    pub fn new(
        timestamp: DateTime<Utc>,
        operation: Operation,
        model: impl Into<String>,
        identity: &Identity,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            operation,
            model: model.into(),
            identity_id: identity.id.clone(),
            tier: identity.tier,
            latency_ms: 0,
            tokens_used: 0,
            cost: 0.0,
            cache_hit: false,
            success: true,
            error_kind: None,
            attempts: 0,
        }
    }

    /// Set latency
    #[must_use]
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set tokens used
    #[must_use]
    pub fn with_tokens(mut self, tokens_used: u64) -> Self {
        self.tokens_used = tokens_used;
        self
    }

    /// Set cost
    #[must_use]
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// Mark as served from cache; cache hits are free
    #[must_use]
    pub fn with_cache_hit(mut self, cache_hit: bool) -> Self {
        self.cache_hit = cache_hit;
        if cache_hit {
            self.cost = 0.0;
        }
        self
    }

    /// Mark as failed with an error class
    #[must_use]
    pub fn with_error(mut self, kind: ErrorKind) -> Self {
        self.success = false;
        self.error_kind = Some(kind);
        self
    }

    /// Set attempts
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Whether this entry represents an actual backend call
    #[must_use]
    pub fn is_backend_call(&self) -> bool {
        !self.cache_hit && self.attempts > 0
    }
}

/// Metrics service configuration
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// How long entries are kept before `prune_expired` drops them
    pub retention: Duration,
    /// Number of recent backend calls in the moving latency average
    pub latency_sample_size: usize,
    /// Prefix for Prometheus metric names
    pub prometheus_prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(35 * 24 * 3600),
            latency_sample_size: 50,
            prometheus_prefix: "ai_governance".to_string(),
        }
    }
}

impl MetricsConfig {
    /// Set retention
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set latency sample size
    #[must_use]
    pub fn with_latency_sample_size(mut self, size: usize) -> Self {
        self.latency_sample_size = size.max(1);
        self
    }

    /// Set the Prometheus prefix
    #[must_use]
    pub fn with_prometheus_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prometheus_prefix = prefix.into();
        self
    }
}

/// Aggregates over a time window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Requests in the window
    pub total_requests: u64,
    /// Successful requests
    pub successful_requests: u64,
    /// Failed requests
    pub failed_requests: u64,
    /// failed / total
    pub error_rate: f64,
    /// Requests served from cache
    pub cache_hits: u64,
    /// cache hits / total
    pub cache_hit_rate: f64,
    /// Mean latency
    pub avg_latency_ms: f64,
    /// 95th percentile latency (nearest rank)
    pub p95_latency_ms: f64,
    /// Total tokens
    pub total_tokens: u64,
    /// Total cost in USD
    pub total_cost: f64,
    /// Cost per model
    pub cost_by_model: BTreeMap<String, f64>,
    /// Request count per operation class
    pub requests_by_operation: BTreeMap<Operation, u64>,
}

/// Per-day request counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCount {
    /// UTC calendar day
    pub date: NaiveDate,
    /// Requests that day
    pub requests: u64,
    /// Failed requests
    pub errors: u64,
    /// Cache hits
    pub cache_hits: u64,
    /// Spend in USD
    pub cost: f64,
}

/// Latency statistics for one operation class
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    /// Sample count
    pub count: u64,
    /// Mean latency
    pub avg_ms: f64,
    /// 50th percentile
    pub p50_ms: f64,
    /// 95th percentile
    pub p95_ms: f64,
    /// Maximum
    pub max_ms: f64,
}

impl LatencyStats {
    fn from_samples(mut samples: Vec<f64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_by(f64::total_cmp);
        let count = samples.len();
        Self {
            count: count as u64,
            avg_ms: samples.iter().sum::<f64>() / count as f64,
            p50_ms: percentile(&samples, 50.0),
            p95_ms: percentile(&samples, 95.0),
            max_ms: samples[count - 1],
        }
    }
}

/// Nearest-rank percentile of an ascending slice; 0 for an empty slice
#[must_use]
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Parse a JSON-lines metrics log; blank lines are skipped
pub fn parse_jsonl(content: &str) -> TelemetryResult<Vec<MetricEntry>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|e| TelemetryError::InvalidRecord {
                line: idx + 1,
                message: e.to_string(),
            })
        })
        .collect()
}

/// Read a JSON-lines metrics log from disk
pub async fn read_jsonl(path: &Path) -> TelemetryResult<Vec<MetricEntry>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| TelemetryError::io(path, e))?;
    parse_jsonl(&content)
}

struct Collectors {
    requests_total: IntCounterVec,
    request_latency_seconds: HistogramVec,
    cache_lookups_total: IntCounterVec,
    rejections_total: IntCounterVec,
    cost_usd_total: CounterVec,
}

impl Collectors {
    fn register(prefix: &str, registry: &Registry) -> TelemetryResult<Self> {
        let name = |suffix: &str| format!("{prefix}_{suffix}");

        let requests_total = IntCounterVec::new(
            Opts::new(name("requests_total"), "Governed requests by outcome"),
            &["operation", "tier", "outcome"],
        )?;
        let request_latency_seconds = HistogramVec::new(
            HistogramOpts::new(name("request_latency_seconds"), "End-to-end request latency")
                .buckets(vec![0.005, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["operation"],
        )?;
        let cache_lookups_total = IntCounterVec::new(
            Opts::new(name("cache_lookups_total"), "Response cache lookups"),
            &["operation", "result"],
        )?;
        let rejections_total = IntCounterVec::new(
            Opts::new(name("rejections_total"), "Requests rejected before the backend"),
            &["operation", "reason"],
        )?;
        let cost_usd_total = CounterVec::new(
            Opts::new(name("cost_usd_total"), "Backend spend in USD"),
            &["model"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_latency_seconds.clone()))?;
        registry.register(Box::new(cache_lookups_total.clone()))?;
        registry.register(Box::new(rejections_total.clone()))?;
        registry.register(Box::new(cost_usd_total.clone()))?;

        Ok(Self {
            requests_total,
            request_latency_seconds,
            cache_lookups_total,
            rejections_total,
            cost_usd_total,
        })
    }

    fn observe(&self, entry: &MetricEntry) {
        let op = entry.operation.as_str();
        let outcome = if entry.success { "success" } else { "error" };
        self.requests_total
            .with_label_values(&[op, entry.tier.as_str(), outcome])
            .inc();
        self.request_latency_seconds
            .with_label_values(&[op])
            .observe(entry.latency_ms as f64 / 1000.0);
        let lookup = if entry.cache_hit { "hit" } else { "miss" };
        self.cache_lookups_total
            .with_label_values(&[op, lookup])
            .inc();
        if entry.cost > 0.0 {
            self.cost_usd_total
                .with_label_values(&[entry.model.as_str()])
                .inc_by(entry.cost);
        }
    }
}

/// Append-only metrics log with windowed aggregates
pub struct MetricsService {
    config: MetricsConfig,
    clock: Arc<dyn Clock>,
    entries: RwLock<Vec<MetricEntry>>,
    latency_samples: Mutex<VecDeque<u64>>,
    registry: Registry,
    collectors: Collectors,
}

impl std::fmt::Debug for MetricsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsService")
            .field("config", &self.config)
            .field("entries", &self.entries.read().len())
            .finish_non_exhaustive()
    }
}

impl MetricsService {
    /// Create a service with its own Prometheus registry
    pub fn new(config: MetricsConfig, clock: Arc<dyn Clock>) -> TelemetryResult<Self> {
        let registry = Registry::new();
        let collectors = Collectors::register(&config.prometheus_prefix, &registry)?;
        Ok(Self {
            config,
            clock,
            entries: RwLock::new(Vec::new()),
            latency_samples: Mutex::new(VecDeque::new()),
            registry,
            collectors,
        })
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Prometheus registry holding this service's collectors
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Append a request outcome
    pub fn record(&self, entry: MetricEntry) {
        debug!(
            operation = %entry.operation,
            model = %entry.model,
            latency_ms = entry.latency_ms,
            cache_hit = entry.cache_hit,
            success = entry.success,
            "Recording request metrics"
        );
        self.collectors.observe(&entry);
        if entry.is_backend_call() && entry.success {
            self.push_latency_sample(entry.latency_ms);
        }
        self.entries.write().push(entry);
    }

    /// Append many outcomes, e.g. from an imported log
    pub fn extend(&self, entries: impl IntoIterator<Item = MetricEntry>) -> usize {
        let mut count = 0;
        for entry in entries {
            self.record(entry);
            count += 1;
        }
        count
    }

    /// Count an admission rejection that never reached the backend
    pub fn record_rejection(&self, operation: Operation, reason: ErrorKind) {
        self.collectors
            .rejections_total
            .with_label_values(&[operation.as_str(), reason.as_str()])
            .inc();
    }

    fn push_latency_sample(&self, latency_ms: u64) {
        let mut samples = self.latency_samples.lock();
        samples.push_back(latency_ms);
        while samples.len() > self.config.latency_sample_size.max(1) {
            samples.pop_front();
        }
    }

    fn window_start(&self, window: Duration) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = self.clock.now();
        let span = ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::weeks(52 * 100));
        (now - span, now)
    }

    fn in_window(&self, window: Duration) -> Vec<MetricEntry> {
        let (start, end) = self.window_start(window);
        self.entries
            .read()
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect()
    }

    /// Aggregates over the trailing window
    pub fn get_metrics(&self, window: Duration) -> MetricsSummary {
        summarize(&self.in_window(window))
    }

    /// Per-day counts for the last `days` UTC calendar days, oldest first
    pub fn get_daily_counts(&self, days: u32) -> Vec<DailyCount> {
        if days == 0 {
            return Vec::new();
        }
        let today = self.clock.now().date_naive();
        let first = today - ChronoDuration::days(i64::from(days) - 1);

        let mut buckets: BTreeMap<NaiveDate, DailyCount> = (0..i64::from(days))
            .map(|offset| {
                let date = first + ChronoDuration::days(offset);
                (
                    date,
                    DailyCount {
                        date,
                        requests: 0,
                        errors: 0,
                        cache_hits: 0,
                        cost: 0.0,
                    },
                )
            })
            .collect();

        for entry in self.entries.read().iter() {
            if let Some(bucket) = buckets.get_mut(&entry.timestamp.date_naive()) {
                bucket.requests += 1;
                bucket.errors += u64::from(!entry.success);
                bucket.cache_hits += u64::from(entry.cache_hit);
                bucket.cost += entry.cost;
            }
        }

        buckets.into_values().collect()
    }

    /// Latency statistics per operation class over the trailing window
    pub fn get_latency_by_operation(&self, window: Duration) -> BTreeMap<Operation, LatencyStats> {
        let mut samples: BTreeMap<Operation, Vec<f64>> = BTreeMap::new();
        for entry in self.in_window(window) {
            samples
                .entry(entry.operation)
                .or_default()
                .push(entry.latency_ms as f64);
        }
        samples
            .into_iter()
            .map(|(op, values)| (op, LatencyStats::from_samples(values)))
            .collect()
    }

    /// Failure counts per error class over the trailing window
    pub fn get_error_breakdown(&self, window: Duration) -> BTreeMap<ErrorKind, u64> {
        let mut breakdown = BTreeMap::new();
        for kind in self.in_window(window).iter().filter_map(|e| e.error_kind) {
            *breakdown.entry(kind).or_insert(0) += 1;
        }
        breakdown
    }

    /// Snapshot of the full log
    pub fn entries(&self) -> Vec<MetricEntry> {
        self.entries.read().clone()
    }

    /// Number of logged entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop entries older than the retention period
    pub fn prune_expired(&self) -> usize {
        let (cutoff, _) = self.window_start(self.config.retention);
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        let pruned = before - entries.len();
        if pruned > 0 {
            info!(pruned, cutoff = %cutoff, "Pruned expired metric entries");
        }
        pruned
    }

    /// Write the log as JSON lines
    pub async fn export_jsonl(&self, path: &Path) -> TelemetryResult<usize> {
        let entries = self.entries();
        let mut out = String::new();
        for entry in &entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| TelemetryError::Serialization(e.to_string()))?;
            out.push_str(&line);
            out.push('\n');
        }
        tokio::fs::write(path, out)
            .await
            .map_err(|e| TelemetryError::io(path, e))?;
        info!(path = %path.display(), entries = entries.len(), "Exported metrics log");
        Ok(entries.len())
    }

    /// Append entries from a JSON-lines file
    pub async fn import_jsonl(&self, path: &Path) -> TelemetryResult<usize> {
        let entries = read_jsonl(path).await?;
        let count = self.extend(entries);
        info!(path = %path.display(), entries = count, "Imported metrics log");
        Ok(count)
    }

    /// Prometheus text exposition of this service's collectors
    pub fn gather_text(&self) -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Serialization(e.to_string()))
    }
}

impl LatencyEstimator for MetricsService {
    fn moving_average_latency_ms(&self) -> Option<f64> {
        let samples = self.latency_samples.lock();
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<u64>() as f64 / samples.len() as f64)
    }
}

/// Aggregate a slice of entries
#[must_use]
pub fn summarize(entries: &[MetricEntry]) -> MetricsSummary {
    let total = entries.len() as u64;
    if total == 0 {
        return MetricsSummary::default();
    }

    let mut summary = MetricsSummary {
        total_requests: total,
        ..Default::default()
    };
    let mut latencies = Vec::with_capacity(entries.len());

    for entry in entries {
        if entry.success {
            summary.successful_requests += 1;
        } else {
            summary.failed_requests += 1;
        }
        summary.cache_hits += u64::from(entry.cache_hit);
        summary.total_tokens += entry.tokens_used;
        summary.total_cost += entry.cost;
        *summary.cost_by_model.entry(entry.model.clone()).or_insert(0.0) += entry.cost;
        *summary
            .requests_by_operation
            .entry(entry.operation)
            .or_insert(0) += 1;
        latencies.push(entry.latency_ms as f64);
    }

    latencies.sort_by(f64::total_cmp);
    summary.error_rate = summary.failed_requests as f64 / total as f64;
    summary.cache_hit_rate = summary.cache_hits as f64 / total as f64;
    summary.avg_latency_ms = latencies.iter().sum::<f64>() / total as f64;
    summary.p95_latency_ms = percentile(&latencies, 95.0);
    summary
}
