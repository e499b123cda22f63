//! Cost tracking integration tests
//!
//! Spend accounting through the orchestrator, budget status, threshold
//! alerts and the offline cost analysis report.

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_backends::*;
use gateway_core::{ManualClock, Operation};
use gateway_telemetry::{
    AlertSeverity, Budget, CostAnalysisReport, CostRecord, CostTracker, OpportunityCategory,
    PricingTable,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn haiku_pricing() -> PricingTable {
    PricingTable::new(0.000_002).with_model("claude-3-5-haiku", 0.000_004)
}

/// $45 of $50 is 90% and still under target
#[tokio::test]
async fn test_budget_status_at_ninety_percent() {
    let clock = manual_clock();
    let tracker = CostTracker::new(haiku_pricing(), Budget::new(50.0), Arc::new(clock));
    tracker
        .record_spend(
            CostRecord::new(start_time(), Operation::Analysis, "claude-3-5-haiku")
                .with_usage(11_250_000, 45.0),
        )
        .await;

    let status = tracker.budget_status().await;
    assert!((status.current_month_cost - 45.0).abs() < 1e-9);
    assert!((status.percentage_of_target - 90.0).abs() < 1e-9);
    assert!(status.is_under_target);
    assert!((status.remaining - 5.0).abs() < 1e-9);
}

/// 1000 requests at an 80% hit rate cost $0.10
#[tokio::test]
async fn test_thousand_requests_eighty_percent_hits() {
    let clock = manual_clock();
    let backend = ScriptedBackend::healthy();
    let gateway = orchestrator(test_config(), backend.clone(), &clock);
    let user = premium_user(1);

    for _ in 0..5 {
        run_distinct(&gateway, Operation::Analysis, &user, 200).await;
    }

    assert_eq!(backend.calls(), 200);
    assert!((gateway.cost_tracker().total_cost() - 0.10).abs() < 1e-9);

    let summary = gateway.metrics().get_metrics(Duration::from_secs(3600));
    assert_eq!(summary.total_requests, 1000);
    assert_eq!(summary.cache_hits, 800);
    assert!((summary.cache_hit_rate - 0.8).abs() < 1e-9);
    assert!((summary.total_cost - 0.10).abs() < 1e-9);
    assert_eq!(summary.total_tokens, 200 * u64::from(MOCK_TOKENS));

    let savings = gateway.cost_tracker().estimated_cache_savings().await;
    assert!((savings - 0.40).abs() < 1e-9);
}

/// Crossing warning then critical emits exactly one alert each
#[tokio::test]
async fn test_alerts_fire_once_per_threshold() {
    let clock = ManualClock::new(month_end());
    let gateway = orchestrator(tight_budget_config(0.01), ScriptedBackend::healthy(), &clock);
    let mut alerts = gateway.subscribe_alerts();

    // 0.0005 per call, so 30 calls reach 150% of target
    run_distinct(&gateway, Operation::Analysis, &premium_user(1), 30).await;

    let mut received = Vec::new();
    while let Ok(alert) = alerts.try_recv() {
        received.push(alert.severity);
    }
    assert_eq!(received, vec![AlertSeverity::Warning, AlertSeverity::Critical]);

    let status = gateway.cost_tracker().budget_status().await;
    assert!(!status.is_under_target);
    assert!((status.percentage_of_target - 150.0).abs() < 1e-6);
}

/// Cached and failed requests add no spend
#[tokio::test]
async fn test_only_backend_successes_cost_money() {
    let clock = manual_clock();
    let backend = ScriptedBackend::failing(1);
    let gateway = orchestrator(test_config(), backend, &clock);
    let user = premium_user(1);

    let failed = gateway.execute(Operation::Analysis, &user, "a").await;
    let fresh = gateway.execute(Operation::Analysis, &user, "a").await;
    let cached = gateway.execute(Operation::Analysis, &user, "a").await;

    assert!(!failed.is_success());
    assert!(fresh.is_success() && !fresh.cache_hit);
    assert!(cached.cache_hit);

    let records = gateway.cost_tracker().records().await;
    let costs: Vec<f64> = records.iter().map(|r| r.cost).collect();
    assert_eq!(costs.len(), 3);
    assert!(costs[0].abs() < f64::EPSILON);
    assert!((costs[1] - 0.0005).abs() < 1e-12);
    assert!(costs[2].abs() < f64::EPSILON);
}

/// Report over a day at 80% hits projects $3 for the month
#[test]
fn test_report_projection_for_one_day() {
    let entries = metric_log(1000, 5, 0.0005);

    let report = CostAnalysisReport::generate(&entries, &Budget::new(50.0), &haiku_pricing(), month_end());

    assert_eq!(report.total_requests, 1000);
    assert_eq!(report.cache_hits, 800);
    assert!((report.total_cost - 0.10).abs() < 1e-9);
    assert!((report.projected_monthly_cost - 3.0).abs() < 1e-9);
    assert!(report.budget.within_budget);
    assert!(report
        .opportunities
        .iter()
        .all(|o| o.category != OpportunityCategory::Caching));
}

/// A cold cache shows up as the top caching opportunity
#[test]
fn test_report_flags_low_hit_rate() {
    let entries = metric_log(100, 0, 0.0005);

    let report = CostAnalysisReport::generate(&entries, &Budget::new(50.0), &haiku_pricing(), month_end());

    assert_eq!(report.cache_hits, 0);
    let top = report.opportunities.first().expect("opportunity found");
    assert_eq!(top.category, OpportunityCategory::Caching);
    assert!(top.potential_savings > 0.0);
}
