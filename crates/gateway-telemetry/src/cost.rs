//! Spend tracking and budget alerts.
//!
//! Provides:
//! - Pure per-request cost calculation from a per-model price table
//! - Append-only spend records (cache hits always cost zero)
//! - Calendar-month spend and linear month-end projection
//! - Budget alerts that fire once per upward threshold crossing

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use gateway_core::{Clock, Operation};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

const ALERT_CHANNEL_CAPACITY: usize = 64;

/// USD-per-token prices by model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    /// Price for models without an explicit entry
    pub default_usd_per_token: f64,
    /// Explicit per-model prices
    pub models: BTreeMap<String, f64>,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new(0.000_002)
    }
}

impl PricingTable {
    /// Create a table with only a default price
    #[must_use]
    pub fn new(default_usd_per_token: f64) -> Self {
        Self {
            default_usd_per_token,
            models: BTreeMap::new(),
        }
    }

    /// Add a model price
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>, usd_per_token: f64) -> Self {
        self.models.insert(model.into(), usd_per_token);
        self
    }

    /// Price per token for a model
    #[must_use]
    pub fn price_for(&self, model: &str) -> f64 {
        self.models
            .get(model)
            .copied()
            .unwrap_or(self.default_usd_per_token)
    }

    /// Cost of a request in USD
    #[must_use]
    pub fn calculate(&self, model: &str, tokens_used: u64) -> f64 {
        tokens_used as f64 * self.price_for(model)
    }
}

/// One spend record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    /// When the request completed
    pub timestamp: DateTime<Utc>,
    /// Operation class
    pub operation: Operation,
    /// Model used
    pub model: String,
    /// Caller id, when known
    pub identity_id: Option<String>,
    /// Tokens consumed
    pub tokens_used: u64,
    /// Cost in USD
    pub cost: f64,
    /// Served from cache
    pub cache_hit: bool,
    /// Request succeeded
    pub success: bool,
}

impl CostRecord {
    /// Create a successful zero-cost record
    pub fn new(timestamp: DateTime<Utc>, operation: Operation, model: impl Into<String>) -> Self {
        Self {
            timestamp,
            operation,
            model: model.into(),
            identity_id: None,
            tokens_used: 0,
            cost: 0.0,
            cache_hit: false,
            success: true,
        }
    }

    /// Set the caller
    #[must_use]
    pub fn with_identity(mut self, identity_id: impl Into<String>) -> Self {
        self.identity_id = Some(identity_id.into());
        self
    }

    /// Set token usage and cost
    #[must_use]
    pub fn with_usage(mut self, tokens_used: u64, cost: f64) -> Self {
        self.tokens_used = tokens_used;
        self.cost = cost;
        self
    }

    /// Mark as served from cache
    #[must_use]
    pub fn with_cache_hit(mut self, cache_hit: bool) -> Self {
        self.cache_hit = cache_hit;
        self
    }

    /// Set success flag
    #[must_use]
    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }
}

/// Monthly budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    /// Monthly spend target in USD
    pub monthly_target_usd: f64,
    /// Warning threshold, percent of target
    pub warning_threshold_pct: f64,
    /// Critical threshold, percent of target
    pub critical_threshold_pct: f64,
}

impl Default for Budget {
    fn default() -> Self {
        Self::new(50.0)
    }
}

impl Budget {
    /// Create a budget with the default 80% / 100% thresholds
    #[must_use]
    pub fn new(monthly_target_usd: f64) -> Self {
        Self {
            monthly_target_usd,
            warning_threshold_pct: 80.0,
            critical_threshold_pct: 100.0,
        }
    }

    /// Set warning and critical thresholds
    #[must_use]
    pub fn with_thresholds(mut self, warning_pct: f64, critical_pct: f64) -> Self {
        self.warning_threshold_pct = warning_pct;
        self.critical_threshold_pct = critical_pct;
        self
    }

    fn threshold_usd(&self, pct: f64) -> f64 {
        self.monthly_target_usd * pct / 100.0
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Warning threshold crossed, or month-end projection over target
    Warning,
    /// Critical threshold crossed
    Critical,
}

impl AlertSeverity {
    /// String form
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Budget alert event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAlert {
    /// Severity
    pub severity: AlertSeverity,
    /// Human-readable message
    pub message: String,
    /// Current month spend in USD
    pub current_spend: f64,
    /// Projected month-end spend in USD
    pub projected_spend: f64,
    /// Threshold that was crossed, in USD
    pub threshold: f64,
    /// When the alert was raised
    pub timestamp: DateTime<Utc>,
}

/// Budget status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    /// Spend so far this calendar month
    pub current_month_cost: f64,
    /// Linear month-end projection
    pub projected_monthly_cost: f64,
    /// Monthly target
    pub monthly_target: f64,
    /// current < target
    pub is_under_target: bool,
    /// current / target × 100
    pub percentage_of_target: f64,
    /// Target minus current, floored at zero
    pub remaining: f64,
}

#[derive(Debug, Default)]
struct AlertState {
    month: Option<(i32, u32)>,
    level: Option<AlertSeverity>,
}

/// Number of days in the month containing `date`
#[must_use]
pub fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|next| next.pred_opt())
        .map_or(30, |last| last.day())
}

/// Spend tracker with budget alerts
pub struct CostTracker {
    pricing: PricingTable,
    budget: Budget,
    clock: Arc<dyn Clock>,
    /// Append-only spend records
    records: RwLock<Vec<CostRecord>>,
    /// Last emitted alert level, for crossing detection
    alert_state: Mutex<AlertState>,
    alerts: broadcast::Sender<BudgetAlert>,
    /// Total tracked cost in micro-dollars
    total_cost: AtomicU64,
    cache_hits: AtomicU64,
}

impl std::fmt::Debug for CostTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostTracker")
            .field("pricing", &self.pricing)
            .field("budget", &self.budget)
            .field("total_cost", &self.total_cost())
            .finish_non_exhaustive()
    }
}

impl CostTracker {
    /// Create a tracker
    pub fn new(pricing: PricingTable, budget: Budget, clock: Arc<dyn Clock>) -> Self {
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            pricing,
            budget,
            clock,
            records: RwLock::new(Vec::new()),
            alert_state: Mutex::new(AlertState::default()),
            alerts,
            total_cost: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }

    /// Price table
    #[must_use]
    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Budget
    #[must_use]
    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// Subscribe to budget alerts
    pub fn subscribe(&self) -> broadcast::Receiver<BudgetAlert> {
        self.alerts.subscribe()
    }

    /// Cost of a request in USD
    #[must_use]
    pub fn calculate_request_cost(&self, model: &str, tokens_used: u64) -> f64 {
        self.pricing.calculate(model, tokens_used)
    }

    /// Record spend; cache hits are stored with zero cost
    pub async fn record_spend(&self, mut record: CostRecord) {
        if record.cache_hit {
            record.cost = 0.0;
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }

        debug!(
            operation = %record.operation,
            model = %record.model,
            tokens = record.tokens_used,
            cost = record.cost,
            cache_hit = record.cache_hit,
            "Recording spend"
        );

        let micros = (record.cost.max(0.0) * 1_000_000.0).round() as u64;
        self.total_cost.fetch_add(micros, Ordering::SeqCst);

        self.records.write().await.push(record);
    }

    /// Total tracked cost across all months
    #[must_use]
    pub fn total_cost(&self) -> f64 {
        self.total_cost.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }

    /// Spend in the current UTC calendar month
    pub async fn get_current_month_cost(&self) -> f64 {
        let now = self.clock.now();
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.timestamp.year() == now.year() && r.timestamp.month() == now.month())
            .map(|r| r.cost)
            .sum()
    }

    /// Linear month-end projection: current / day_of_month × days_in_month
    pub async fn get_projected_monthly_cost(&self) -> f64 {
        let current = self.get_current_month_cost().await;
        let today = self.clock.now().date_naive();
        let elapsed = today.day().max(1);
        current / f64::from(elapsed) * f64::from(days_in_month(today))
    }

    /// Budget status snapshot
    pub async fn budget_status(&self) -> BudgetStatus {
        let current = self.get_current_month_cost().await;
        let projected = self.get_projected_monthly_cost().await;
        let target = self.budget.monthly_target_usd;
        let percentage_of_target = if target > 0.0 {
            current / target * 100.0
        } else {
            0.0
        };

        BudgetStatus {
            current_month_cost: current,
            projected_monthly_cost: projected,
            monthly_target: target,
            is_under_target: current < target,
            percentage_of_target,
            remaining: (target - current).max(0.0),
        }
    }

    /// Evaluate thresholds; returns an alert only on an upward crossing
    pub async fn check_budget(&self) -> Option<BudgetAlert> {
        let target = self.budget.monthly_target_usd;
        if target <= 0.0 {
            return None;
        }

        let now = self.clock.now();
        let current = self.get_current_month_cost().await;
        let projected = self.get_projected_monthly_cost().await;
        let current_pct = current / target * 100.0;
        let projected_pct = projected / target * 100.0;

        let level = if current_pct >= self.budget.critical_threshold_pct {
            Some(AlertSeverity::Critical)
        } else if current_pct >= self.budget.warning_threshold_pct || projected_pct >= 100.0 {
            Some(AlertSeverity::Warning)
        } else {
            None
        };

        let crossed = {
            let mut state = self.alert_state.lock();
            let month = (now.year(), now.month());
            if state.month != Some(month) {
                state.month = Some(month);
                state.level = None;
            }
            let crossed = level > state.level;
            // Dropping below a level re-arms it
            state.level = level;
            crossed
        };

        if !crossed {
            return None;
        }
        let severity = level?;

        let (threshold, message) = match severity {
            AlertSeverity::Critical => {
                let threshold = self.budget.threshold_usd(self.budget.critical_threshold_pct);
                (
                    threshold,
                    format!(
                        "Monthly AI spend ${current:.2} reached {current_pct:.1}% of the ${target:.2} target"
                    ),
                )
            }
            AlertSeverity::Warning => {
                let threshold = self.budget.threshold_usd(self.budget.warning_threshold_pct);
                let message = if current_pct >= self.budget.warning_threshold_pct {
                    format!(
                        "Monthly AI spend ${current:.2} reached {current_pct:.1}% of the ${target:.2} target"
                    )
                } else {
                    format!(
                        "Projected monthly AI spend ${projected:.2} exceeds the ${target:.2} target"
                    )
                };
                (threshold, message)
            }
        };

        let alert = BudgetAlert {
            severity,
            message,
            current_spend: current,
            projected_spend: projected,
            threshold,
            timestamp: now,
        };

        warn!(
            severity = severity.as_str(),
            current_spend = current,
            projected_spend = projected,
            threshold = threshold,
            "Budget threshold crossed"
        );

        // No subscribers is fine; the alert is still returned
        let _ = self.alerts.send(alert.clone());
        Some(alert)
    }

    /// Cache hits × average cost of non-cached successful requests
    pub async fn estimated_cache_savings(&self) -> f64 {
        let records = self.records.read().await;
        let (sum, count) = records
            .iter()
            .filter(|r| !r.cache_hit && r.success)
            .fold((0.0, 0u64), |(sum, count), r| (sum + r.cost, count + 1));
        if count == 0 {
            return 0.0;
        }
        self.cache_hits.load(Ordering::Relaxed) as f64 * (sum / count as f64)
    }

    /// Snapshot of all records
    pub async fn records(&self) -> Vec<CostRecord> {
        self.records.read().await.clone()
    }

    /// Drop records older than `cutoff`
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.timestamp >= cutoff);
        let pruned = before - records.len();
        if pruned > 0 {
            info!(pruned, cutoff = %cutoff, "Pruned spend records");
        }
        pruned
    }
}
