//! Test fixtures and sample data for integration tests

use chrono::{DateTime, TimeZone, Utc};
use gateway_config::GovernanceConfig;
use gateway_core::{Identity, ManualClock, Operation};
use gateway_telemetry::MetricEntry;
use std::time::Duration;

/// Monday morning used as the start of most scenarios
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 4, 9, 0, 0)
        .single()
        .expect("valid date")
}

/// Last day of November, where the month-end projection equals current spend
pub fn month_end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 30, 9, 0, 0)
        .single()
        .expect("valid date")
}

/// Clock frozen at [`start_time`]
pub fn manual_clock() -> ManualClock {
    ManualClock::new(start_time())
}

/// Free-tier identity
pub fn free_user(n: usize) -> Identity {
    Identity::free(format!("free-user-{n}"))
}

/// Premium identity
pub fn premium_user(n: usize) -> Identity {
    Identity::premium(format!("premium-user-{n}"))
}

/// Defaults with a short backend timeout and no retries
pub fn test_config() -> GovernanceConfig {
    let mut config = GovernanceConfig::default();
    config.backend.timeout = Duration::from_secs(5);
    config.retry.max_retries = 0;
    config
}

/// Configuration with a tiny monthly budget
pub fn tight_budget_config(monthly_target_usd: f64) -> GovernanceConfig {
    let mut config = test_config();
    config.budget.monthly_target_usd = monthly_target_usd;
    config
}

/// Distinct prompt for request `n`
pub fn prompt(n: usize) -> String {
    format!("Summarize the open items of project #{n}")
}

/// Sample prompts per operation class
pub fn sample_prompts() -> Vec<(Operation, &'static str)> {
    vec![
        (Operation::Analysis, "Analyze the architecture of the billing service"),
        (Operation::Suggestions, "Suggest next steps for the onboarding flow"),
        (Operation::Enhancement, "Improve this prompt: write a release note"),
        (Operation::Chat, "How do I rotate the deploy keys?"),
    ]
}

/// Metric entries matching a day with the given hit ratio.
///
/// Every backend call costs `cost_per_call`; cache hits cost nothing.
pub fn metric_log(total: usize, hit_every: usize, cost_per_call: f64) -> Vec<MetricEntry> {
    (0..total)
        .map(|i| {
            let user = free_user(i % 10);
            let hit = hit_every > 0 && i % hit_every != 0;
            MetricEntry::new(start_time(), Operation::Analysis, "claude-3-5-haiku", &user)
                .with_tokens(if hit { 0 } else { 125 })
                .with_cost(cost_per_call)
                .with_attempts(u32::from(!hit))
                .with_cache_hit(hit)
        })
        .collect()
}
