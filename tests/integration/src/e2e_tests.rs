//! End-to-end integration tests
//!
//! Complete governed request flows from admission to reporting.

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_backends::*;
use gateway_core::{BackendError, BackendResponse, Clock, ErrorKind, Operation};
use gateway_orchestrator::HealthStatus;
use gateway_telemetry::{Budget, CostAnalysisReport, MetricsConfig, MetricsService, PricingTable};
use std::sync::Arc;
use std::time::Duration;

/// A free user's hour: fresh call, cache hit, quota exhaustion, then a report
#[tokio::test]
async fn test_free_user_session_to_report() {
    let clock = manual_clock();
    let backend = ScriptedBackend::healthy();
    let gateway = orchestrator(test_config(), backend.clone(), &clock);
    let user = free_user(1);

    let fresh = gateway.execute(Operation::Chat, &user, "What changed today?").await;
    assert_eq!(fresh.result.as_deref(), Some("echo: What changed today?"));
    assert_eq!(fresh.attempts, 1);

    clock.advance(Duration::from_secs(60));
    let cached = gateway.execute(Operation::Chat, &user, "What changed today?").await;
    assert!(cached.cache_hit);

    run_distinct(&gateway, Operation::Suggestions, &user, 18).await;
    let limited = gateway.execute(Operation::Chat, &user, "anything else?").await;
    assert_failed_with(&limited, ErrorKind::RateLimitExceeded);

    let health = gateway.health().await;
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.queue_free, 1);
    assert_eq!(health.rate_limiter.allowed, 20);
    assert_eq!(health.rate_limiter.denied, 1);
    assert_eq!(gateway.metrics().len(), 20);

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("metrics.jsonl");
    assert_eq!(gateway.metrics().export_jsonl(&path).await.expect("export"), 20);

    let offline = MetricsService::new(MetricsConfig::default(), Arc::new(clock.clone()))
        .expect("metrics service");
    assert_eq!(offline.import_jsonl(&path).await.expect("import"), 20);

    let pricing = PricingTable::new(0.000_002).with_model("claude-3-5-haiku", 0.000_004);
    let report =
        CostAnalysisReport::generate(&offline.entries(), &Budget::new(50.0), &pricing, clock.now());
    assert_eq!(report.total_requests, 20);
    assert_eq!(report.cache_hits, 1);
    assert!((report.total_cost - 19.0 * 0.0005).abs() < 1e-9);
    assert_eq!(report.cost_per_user.users, 1);
    assert!(report.render_text().contains("Optimization Opportunities"));
}

/// Invalid output is retried once, a repeat turns into a fallback
#[tokio::test]
async fn test_malformed_backend_output() {
    let clock = manual_clock();
    let backend = ScriptedBackend::with_script(vec![
        Err(BackendError::invalid_response("truncated JSON")),
        Ok(BackendResponse::new("fixed", 80)),
        Ok(BackendResponse::new("   ", 10)),
        Err(BackendError::invalid_response("truncated JSON")),
    ]);
    let gateway = orchestrator(test_config(), backend.clone(), &clock);
    let user = premium_user(1);

    let recovered = gateway.execute(Operation::Enhancement, &user, "first").await;
    assert_eq!(recovered.result.as_deref(), Some("fixed"));
    assert_eq!(recovered.attempts, 2);

    let broken = gateway.execute(Operation::Enhancement, &user, "second").await;
    assert_failed_with(&broken, ErrorKind::InvalidResponseFormat);
    assert_eq!(broken.attempts, 2);
    assert_eq!(backend.calls(), 4);

    let snapshot = gateway.breakers().get(Operation::Enhancement).snapshot();
    assert_eq!(snapshot.total_failures, 1);
    assert_eq!(snapshot.consecutive_failures, 1);
}

/// Retryable failures are retried before giving up
#[tokio::test(start_paused = true)]
async fn test_transient_failure_recovers_with_retry() {
    let clock = manual_clock();
    let backend = ScriptedBackend::failing(2);
    let mut config = test_config();
    config.retry.max_retries = 2;
    let gateway = gateway_orchestrator::GatewayOrchestrator::from_config(
        config,
        backend.clone(),
        Arc::new(clock.clone()),
    )
    .expect("valid configuration");

    let response = gateway.execute(Operation::Analysis, &premium_user(1), "retry me").await;

    assert!(response.is_success());
    assert_eq!(response.attempts, 3);
    assert_eq!(backend.calls(), 3);
    let summary = gateway.metrics().get_metrics(Duration::from_secs(60));
    assert_eq!(summary.successful_requests, 1);
    assert_eq!(summary.failed_requests, 0);
}

/// Maintenance drops state past its retention
#[tokio::test]
async fn test_maintenance_after_retention() {
    let clock = manual_clock();
    let gateway = orchestrator(test_config(), ScriptedBackend::healthy(), &clock);
    let user = free_user(3);

    run_distinct(&gateway, Operation::Chat, &user, 21).await;
    assert_eq!(gateway.queue().len(), 1);

    clock.advance(Duration::from_secs(36 * 24 * 3600));
    let report = gateway.run_maintenance().await;

    assert_eq!(report.idle_rate_limits, 1);
    assert_eq!(report.stale_tickets, 1);
    assert_eq!(report.expired_metrics, 20);
    assert_eq!(report.expired_cost_records, 20);
    assert!(gateway.metrics().is_empty());
    assert!(gateway.queue().is_empty());
}

/// Daily counts and Prometheus output reflect the traffic
#[tokio::test]
async fn test_observability_views() {
    let clock = manual_clock();
    let gateway = orchestrator(test_config(), ScriptedBackend::failing(1), &clock);
    let user = premium_user(1);

    gateway.execute(Operation::Chat, &user, "day one").await;
    clock.advance(Duration::from_secs(24 * 3600));
    gateway.execute(Operation::Chat, &user, "day two").await;
    gateway.execute(Operation::Chat, &user, "day two").await;

    let days = gateway.metrics().get_daily_counts(3);
    let counts: Vec<(u64, u64, u64)> = days
        .iter()
        .map(|d| (d.requests, d.errors, d.cache_hits))
        .collect();
    assert_eq!(counts, vec![(0, 0, 0), (1, 1, 0), (2, 0, 1)]);

    let breakdown = gateway.metrics().get_error_breakdown(Duration::from_secs(7 * 24 * 3600));
    assert_eq!(breakdown.get(&ErrorKind::BackendUnavailable), Some(&1));

    let text = gateway.metrics().gather_text().expect("encode");
    assert!(text.contains("ai_governance_requests_total"));
    assert!(text.contains("ai_governance_cache_lookups_total"));
}
