//! Rate limiting integration tests
//!
//! Per-identity windows, premium bypass, concurrent admission, store
//! outages and the advisory queue handed to rejected callers.

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_backends::*;
use futures::future::join_all;
use gateway_core::{ErrorKind, Operation};
use gateway_resilience::{Lane, RateLimiter, RateLimiterConfig};
use std::sync::Arc;
use std::time::Duration;

/// Twenty requests per hour pass, the twenty-first is rejected
#[tokio::test]
async fn test_twenty_requests_then_denied() {
    let clock = manual_clock();
    let backend = ScriptedBackend::healthy();
    let gateway = orchestrator(test_config(), backend.clone(), &clock);
    let user = free_user(1);

    let responses = run_distinct(&gateway, Operation::Chat, &user, 20).await;
    assert!(responses.iter().all(|r| r.is_success()));

    let rejected = gateway.execute(Operation::Chat, &user, "one more").await;
    assert_failed_with(&rejected, ErrorKind::RateLimitExceeded);
    assert_eq!(rejected.retry_after_ms, Some(3_600_000));
    assert_eq!(rejected.queue_position, Some(0));
    assert_eq!(backend.calls(), 20);
}

/// The window resets one hour after the first request
#[tokio::test]
async fn test_window_resets_after_an_hour() {
    let clock = manual_clock();
    let gateway = orchestrator(test_config(), ScriptedBackend::healthy(), &clock);
    let user = free_user(1);

    run_distinct(&gateway, Operation::Chat, &user, 20).await;

    clock.advance(Duration::from_secs(30 * 60));
    let still_limited = gateway.execute(Operation::Chat, &user, "later").await;
    assert_eq!(still_limited.retry_after_ms, Some(30 * 60 * 1000));

    clock.advance(Duration::from_secs(30 * 60));
    let fresh = gateway.execute(Operation::Chat, &user, "next window").await;
    assert!(fresh.is_success());
}

/// Windows are tracked per identity
#[tokio::test]
async fn test_limits_are_per_identity() {
    let clock = manual_clock();
    let gateway = orchestrator(test_config(), ScriptedBackend::healthy(), &clock);

    run_distinct(&gateway, Operation::Chat, &free_user(1), 20).await;

    let other = gateway.execute(Operation::Chat, &free_user(2), "hello").await;
    assert!(other.is_success());
}

/// Premium callers are never rate limited
#[tokio::test]
async fn test_premium_always_allowed() {
    let clock = manual_clock();
    let gateway = orchestrator(test_config(), ScriptedBackend::healthy(), &clock);

    let responses = run_distinct(&gateway, Operation::Analysis, &premium_user(1), 100).await;

    assert!(responses.iter().all(|r| r.is_success()));
    assert_eq!(gateway.rate_limiter().stats().bypassed, 100);
    assert_eq!(gateway.rate_limiter().stats().denied, 0);
}

/// Concurrent checks never admit more than the limit
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admission_respects_limit() {
    let clock = manual_clock();
    let limiter = Arc::new(RateLimiter::new(
        RateLimiterConfig::default(),
        Arc::new(clock.clone()),
    ));
    let user = free_user(7);

    let checks = (0..100).map(|_| {
        let limiter = Arc::clone(&limiter);
        let user = user.clone();
        async move { limiter.check_and_consume(&user).await.is_allowed() }
    });
    let allowed = join_all(checks).await.into_iter().filter(|a| *a).count();

    assert_eq!(allowed, 20);
    let stats = limiter.stats();
    assert_eq!(stats.allowed, 20);
    assert_eq!(stats.denied, 80);
}

/// A broken store admits requests instead of blocking them
#[tokio::test]
async fn test_store_outage_fails_open() {
    let clock = manual_clock();
    let gateway = gateway_orchestrator::GatewayOrchestrator::builder()
        .config(test_config())
        .backend(ScriptedBackend::healthy())
        .clock(Arc::new(clock.clone()))
        .rate_limit_store(Arc::new(UnreachableRateLimitStore))
        .build()
        .expect("valid configuration");

    let responses = run_distinct(&gateway, Operation::Chat, &free_user(1), 25).await;

    assert!(responses.iter().all(|r| r.is_success()));
    assert_eq!(gateway.rate_limiter().stats().degraded, 25);
}

/// Rejected callers receive queue tickets in arrival order
#[tokio::test]
async fn test_rejected_callers_are_queued() {
    let clock = manual_clock();
    let gateway = orchestrator(test_config(), ScriptedBackend::healthy(), &clock);
    let (first, second) = (free_user(1), free_user(2));

    run_distinct(&gateway, Operation::Chat, &first, 20).await;
    run_distinct(&gateway, Operation::Chat, &second, 20).await;

    let a = gateway.execute(Operation::Chat, &first, "extra").await;
    let b = gateway.execute(Operation::Chat, &second, "extra").await;
    assert_eq!(a.queue_position, Some(0));
    assert_eq!(b.queue_position, Some(1));

    // Asking again keeps the caller's place
    let again = gateway.execute(Operation::Chat, &first, "extra").await;
    let (ticket_a, ticket_again) = (
        a.ticket.expect("ticket issued"),
        again.ticket.expect("ticket issued"),
    );
    assert_eq!(ticket_a.id, ticket_again.id);
    assert_eq!(ticket_a.lane, Lane::Free);
    assert_eq!(gateway.queue().lane_len(Lane::Free), 2);

    assert!(gateway.leave_queue(&ticket_a));
    let moved = gateway
        .queue_position(b.ticket.as_ref().expect("ticket issued"))
        .expect("still queued");
    assert_eq!(moved.position, 0);
}
