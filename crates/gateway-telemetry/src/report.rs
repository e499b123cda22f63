//! Cost analysis report over a metrics log.

use crate::cost::{Budget, PricingTable};
use crate::metrics::{percentile, MetricEntry};
use chrono::{DateTime, Utc};
use gateway_core::Operation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Days in the normalized month used for projections
const PROJECTION_DAYS: f64 = 30.0;

/// Cache hit rate considered achievable for repeated prompts
const TARGET_CACHE_HIT_RATE: f64 = 0.6;

/// Error rate above which error reduction is suggested
const ERROR_RATE_THRESHOLD: f64 = 0.05;

/// Share of premium-model volume assumed movable to the cheapest model
const MODEL_DOWNGRADE_SHARE: f64 = 0.5;

/// Per-user cost percentiles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostDistribution {
    /// Distinct users
    pub users: usize,
    /// Mean cost per user
    pub mean: f64,
    /// Median
    pub p50: f64,
    /// 75th percentile
    pub p75: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// Highest per-user cost
    pub max: f64,
}

impl CostDistribution {
    fn from_costs(mut costs: Vec<f64>) -> Self {
        if costs.is_empty() {
            return Self::default();
        }
        costs.sort_by(f64::total_cmp);
        let users = costs.len();
        Self {
            users,
            mean: costs.iter().sum::<f64>() / users as f64,
            p50: percentile(&costs, 50.0),
            p75: percentile(&costs, 75.0),
            p90: percentile(&costs, 90.0),
            p95: percentile(&costs, 95.0),
            p99: percentile(&costs, 99.0),
            max: costs[users - 1],
        }
    }
}

/// Projected spend against the monthly target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetVerification {
    /// Monthly target in USD
    pub monthly_target: f64,
    /// Projected monthly spend in USD
    pub projected_monthly_cost: f64,
    /// projected / target × 100
    pub percentage_of_target: f64,
    /// projected ≤ target
    pub within_budget: bool,
    /// target − projected (negative when over)
    pub headroom: f64,
}

/// Opportunity category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityCategory {
    /// Raise the cache hit rate
    Caching,
    /// Route to cheaper models
    ModelSelection,
    /// Reduce failed requests
    ErrorReduction,
    /// Cap heavy users
    PerUserQuotas,
}

impl OpportunityCategory {
    /// Display label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Caching => "Caching",
            Self::ModelSelection => "Model selection",
            Self::ErrorReduction => "Error reduction",
            Self::PerUserQuotas => "Per-user quotas",
        }
    }
}

/// Qualitative level used for priority and effort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
}

impl Level {
    /// Display label
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Priority from the share of projected monthly spend an opportunity saves
    #[must_use]
    pub fn from_savings_share(share: f64) -> Self {
        if share >= 0.2 {
            Self::High
        } else if share >= 0.05 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Ranked optimization suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOpportunity {
    /// Category
    pub category: OpportunityCategory,
    /// What to do
    pub description: String,
    /// Estimated monthly savings in USD
    pub potential_savings: f64,
    /// Priority
    pub priority: Level,
    /// Implementation effort
    pub effort: Level,
}

/// Cost analysis over a set of metric entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostAnalysisReport {
    /// When the report was generated
    pub generated_at: DateTime<Utc>,
    /// Earliest entry
    pub period_start: Option<DateTime<Utc>>,
    /// Latest entry
    pub period_end: Option<DateTime<Utc>>,
    /// Calendar days spanned, at least 1
    pub days_covered: u32,
    /// Requests
    pub total_requests: u64,
    /// Cache hits
    pub cache_hits: u64,
    /// cache hits / requests
    pub cache_hit_rate: f64,
    /// Failed requests
    pub failed_requests: u64,
    /// failed / requests
    pub error_rate: f64,
    /// Tokens consumed
    pub total_tokens: u64,
    /// Spend in USD
    pub total_cost: f64,
    /// Mean cost of requests that reached the backend and succeeded
    pub avg_backend_cost: f64,
    /// Spend per model
    pub cost_by_model: BTreeMap<String, f64>,
    /// Spend per operation class
    pub cost_by_operation: BTreeMap<Operation, f64>,
    /// Per-user cost distribution
    pub cost_per_user: CostDistribution,
    /// total / days × 30
    pub projected_monthly_cost: f64,
    /// Projection against the budget
    pub budget: BudgetVerification,
    /// Suggestions, highest savings first
    pub opportunities: Vec<OptimizationOpportunity>,
}

impl CostAnalysisReport {
    /// Build a report
    pub fn generate(
        entries: &[MetricEntry],
        budget: &Budget,
        pricing: &PricingTable,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let period_start = entries.iter().map(|e| e.timestamp).min();
        let period_end = entries.iter().map(|e| e.timestamp).max();
        let days_covered = match (period_start, period_end) {
            (Some(start), Some(end)) => {
                ((end.date_naive() - start.date_naive()).num_days() + 1).max(1) as u32
            }
            _ => 1,
        };

        let total_requests = entries.len() as u64;
        let mut cache_hits = 0u64;
        let mut failed_requests = 0u64;
        let mut total_tokens = 0u64;
        let mut total_cost = 0.0;
        let mut backend_cost = 0.0;
        let mut backend_successes = 0u64;
        let mut cost_by_model: BTreeMap<String, f64> = BTreeMap::new();
        let mut cost_by_operation: BTreeMap<Operation, f64> = BTreeMap::new();
        let mut cost_by_user: BTreeMap<&str, f64> = BTreeMap::new();

        for entry in entries {
            cache_hits += u64::from(entry.cache_hit);
            failed_requests += u64::from(!entry.success);
            total_tokens += entry.tokens_used;
            total_cost += entry.cost;
            if entry.success && !entry.cache_hit {
                backend_cost += entry.cost;
                backend_successes += 1;
            }
            *cost_by_model.entry(entry.model.clone()).or_insert(0.0) += entry.cost;
            *cost_by_operation.entry(entry.operation).or_insert(0.0) += entry.cost;
            *cost_by_user.entry(entry.identity_id.as_str()).or_insert(0.0) += entry.cost;
        }

        let ratio = |n: u64| {
            if total_requests == 0 {
                0.0
            } else {
                n as f64 / total_requests as f64
            }
        };
        let avg_backend_cost = if backend_successes == 0 {
            0.0
        } else {
            backend_cost / backend_successes as f64
        };
        let scale = PROJECTION_DAYS / f64::from(days_covered);
        let projected_monthly_cost = total_cost * scale;

        let target = budget.monthly_target_usd;
        let budget_check = BudgetVerification {
            monthly_target: target,
            projected_monthly_cost,
            percentage_of_target: if target > 0.0 {
                projected_monthly_cost / target * 100.0
            } else {
                0.0
            },
            within_budget: projected_monthly_cost <= target,
            headroom: target - projected_monthly_cost,
        };

        let user_costs: Vec<f64> = cost_by_user.values().copied().collect();
        let cost_per_user = CostDistribution::from_costs(user_costs.clone());

        let mut report = Self {
            generated_at,
            period_start,
            period_end,
            days_covered,
            total_requests,
            cache_hits,
            cache_hit_rate: ratio(cache_hits),
            failed_requests,
            error_rate: ratio(failed_requests),
            total_tokens,
            total_cost,
            avg_backend_cost,
            cost_by_model,
            cost_by_operation,
            cost_per_user,
            projected_monthly_cost,
            budget: budget_check,
            opportunities: Vec::new(),
        };
        report.opportunities = report.find_opportunities(entries, pricing, &user_costs, scale);
        report
    }

    fn find_opportunities(
        &self,
        entries: &[MetricEntry],
        pricing: &PricingTable,
        user_costs: &[f64],
        scale: f64,
    ) -> Vec<OptimizationOpportunity> {
        let mut found = Vec::new();

        if self.cache_hit_rate < TARGET_CACHE_HIT_RATE && self.total_requests > 0 {
            let uncached_share = 1.0 - self.cache_hit_rate;
            let gain = (TARGET_CACHE_HIT_RATE - self.cache_hit_rate) / uncached_share;
            let savings = self.total_cost * gain * scale;
            found.push((
                OpportunityCategory::Caching,
                format!(
                    "Cache hit rate is {:.1}%; raising it to {:.0}% with longer TTLs or warming avoids repeat backend calls",
                    self.cache_hit_rate * 100.0,
                    TARGET_CACHE_HIT_RATE * 100.0
                ),
                savings,
                Level::Low,
            ));
        }

        let cheapest = pricing
            .models
            .values()
            .copied()
            .chain(std::iter::once(pricing.default_usd_per_token))
            .fold(f64::INFINITY, f64::min);
        let premium_excess: f64 = entries
            .iter()
            .filter(|e| e.success && !e.cache_hit)
            .map(|e| e.tokens_used as f64 * (pricing.price_for(&e.model) - cheapest).max(0.0))
            .sum();
        if premium_excess > 0.0 {
            found.push((
                OpportunityCategory::ModelSelection,
                format!(
                    "Route simpler requests to the cheapest configured model (${cheapest:.7}/token)"
                ),
                premium_excess * MODEL_DOWNGRADE_SHARE * scale,
                Level::Medium,
            ));
        }

        if self.error_rate > ERROR_RATE_THRESHOLD {
            found.push((
                OpportunityCategory::ErrorReduction,
                format!(
                    "{:.1}% of requests failed; each failure is typically re-issued by the caller",
                    self.error_rate * 100.0
                ),
                self.failed_requests as f64 * self.avg_backend_cost * scale,
                Level::Medium,
            ));
        }

        if user_costs.len() >= 2 {
            let p90 = self.cost_per_user.p90;
            let excess: f64 = user_costs.iter().map(|c| (c - p90).max(0.0)).sum();
            if excess > 0.0 {
                found.push((
                    OpportunityCategory::PerUserQuotas,
                    format!("Cap per-user spend near the 90th percentile (${p90:.4})"),
                    excess * scale,
                    Level::Low,
                ));
            }
        }

        let mut opportunities: Vec<OptimizationOpportunity> = found
            .into_iter()
            .filter(|(_, _, savings, _)| *savings > 0.0)
            .map(|(category, description, potential_savings, effort)| {
                let share = if self.projected_monthly_cost > 0.0 {
                    potential_savings / self.projected_monthly_cost
                } else {
                    0.0
                };
                OptimizationOpportunity {
                    category,
                    description,
                    potential_savings,
                    priority: Level::from_savings_share(share),
                    effort,
                }
            })
            .collect();
        opportunities.sort_by(|a, b| b.potential_savings.total_cmp(&a.potential_savings));
        opportunities
    }

    /// Plain-text rendering
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        // fmt::Write into a String cannot fail
        let _ = self.write_text(&mut out);
        out
    }

    fn write_text(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "AI Cost Analysis Report")?;
        writeln!(out, "Generated: {}", self.generated_at.to_rfc3339())?;
        if let (Some(start), Some(end)) = (self.period_start, self.period_end) {
            writeln!(
                out,
                "Period: {} to {} ({} day(s))",
                start.date_naive(),
                end.date_naive(),
                self.days_covered
            )?;
        }

        writeln!(out, "\nSummary")?;
        writeln!(out, "  Total Requests: {}", self.total_requests)?;
        writeln!(out, "  Total Cost: ${:.4}", self.total_cost)?;
        writeln!(out, "  Total Tokens: {}", self.total_tokens)?;
        writeln!(out, "  Cache Hit Rate: {:.1}%", self.cache_hit_rate * 100.0)?;
        writeln!(out, "  Error Rate: {:.1}%", self.error_rate * 100.0)?;
        writeln!(out, "  Avg Backend Cost: ${:.6}", self.avg_backend_cost)?;

        writeln!(out, "\nCost by Model")?;
        for (model, cost) in &self.cost_by_model {
            writeln!(out, "  {model}: ${cost:.4}")?;
        }

        writeln!(out, "\nCost by Operation")?;
        for (operation, cost) in &self.cost_by_operation {
            writeln!(out, "  {operation}: ${cost:.4}")?;
        }

        let d = &self.cost_per_user;
        writeln!(out, "\nCost per User ({} users)", d.users)?;
        writeln!(out, "  p50: ${:.4}", d.p50)?;
        writeln!(out, "  p75: ${:.4}", d.p75)?;
        writeln!(out, "  p90: ${:.4}", d.p90)?;
        writeln!(out, "  p95: ${:.4}", d.p95)?;
        writeln!(out, "  p99: ${:.4}", d.p99)?;
        writeln!(out, "  max: ${:.4}", d.max)?;

        let b = &self.budget;
        writeln!(out, "\nMonthly Budget")?;
        writeln!(out, "  Target: ${:.2}", b.monthly_target)?;
        writeln!(out, "  Projected: ${:.2}", b.projected_monthly_cost)?;
        writeln!(out, "  Of Target: {:.1}%", b.percentage_of_target)?;
        writeln!(
            out,
            "  Status: {}",
            if b.within_budget { "within budget" } else { "OVER BUDGET" }
        )?;

        writeln!(out, "\nOptimization Opportunities")?;
        if self.opportunities.is_empty() {
            writeln!(out, "  (none)")?;
        }
        for (rank, o) in self.opportunities.iter().enumerate() {
            writeln!(
                out,
                "  {}. [{}] {} (save ~${:.2}/month, priority {}, effort {})",
                rank + 1,
                o.category.label(),
                o.description,
                o.potential_savings,
                o.priority.as_str(),
                o.effort.as_str()
            )?;
        }
        Ok(())
    }
}
