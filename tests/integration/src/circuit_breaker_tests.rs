//! Circuit breaker integration tests
//!
//! Opening after consecutive failures, half-open trials, backoff
//! escalation, timeouts and authentication failures.

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_backends::*;
use gateway_core::{BackendError, ErrorKind, Operation};
use gateway_orchestrator::HealthStatus;
use gateway_resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

/// Five consecutive failures open the circuit and stop backend traffic
#[tokio::test]
async fn test_five_failures_open_circuit() {
    let clock = manual_clock();
    let backend = ScriptedBackend::failing(5);
    let gateway = orchestrator(test_config(), backend.clone(), &clock);
    let user = premium_user(1);

    for response in run_distinct(&gateway, Operation::Chat, &user, 5).await {
        assert_failed_with(&response, ErrorKind::BackendUnavailable);
    }
    assert_eq!(gateway.breakers().get(Operation::Chat).state(), CircuitState::Open);

    let rejected = gateway.execute(Operation::Chat, &user, "blocked").await;
    assert_failed_with(&rejected, ErrorKind::CircuitOpen);
    assert_eq!(rejected.retry_after_ms, Some(30_000));
    assert_eq!(rejected.attempts, 0);
    assert_eq!(backend.calls(), 5);
}

/// A successful trial after the backoff closes the circuit
#[tokio::test]
async fn test_half_open_trial_success_closes() {
    let clock = manual_clock();
    let gateway = orchestrator(test_config(), ScriptedBackend::failing(5), &clock);
    let user = premium_user(1);
    run_distinct(&gateway, Operation::Chat, &user, 5).await;

    clock.advance(Duration::from_secs(30));
    let trial = gateway.execute(Operation::Chat, &user, "trial").await;

    assert!(trial.is_success());
    let snapshot = gateway.breakers().get(Operation::Chat).snapshot();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.consecutive_failures, 0);
    assert_eq!(snapshot.backoff_ms, 30_000);
}

/// A failed trial reopens the circuit with a doubled backoff
#[tokio::test]
async fn test_half_open_trial_failure_doubles_backoff() {
    let clock = manual_clock();
    let gateway = orchestrator(test_config(), ScriptedBackend::failing(6), &clock);
    let user = premium_user(1);
    run_distinct(&gateway, Operation::Chat, &user, 5).await;

    clock.advance(Duration::from_secs(30));
    let trial = gateway.execute(Operation::Chat, &user, "trial").await;
    assert_failed_with(&trial, ErrorKind::BackendUnavailable);

    let snapshot = gateway.breakers().get(Operation::Chat).snapshot();
    assert_eq!(snapshot.state, CircuitState::Open);
    assert_eq!(snapshot.backoff_ms, 60_000);
    assert_eq!(snapshot.times_opened, 2);

    clock.advance(Duration::from_secs(59));
    let early = gateway.execute(Operation::Chat, &user, "too early").await;
    assert_eq!(early.retry_after_ms, Some(1_000));
}

/// Backoff doubles on every failed trial up to the cap
#[test]
fn test_backoff_is_capped() {
    let clock = manual_clock();
    let breaker = CircuitBreaker::new("chat", CircuitBreakerConfig::default(), Arc::new(clock.clone()));
    for _ in 0..5 {
        let permit = breaker.guard().expect("closed");
        breaker.record_outcome(permit, false);
    }

    let mut observed = vec![breaker.snapshot().backoff_ms];
    for _ in 0..5 {
        clock.advance(Duration::from_millis(breaker.snapshot().backoff_ms));
        let permit = breaker.guard().expect("trial admitted");
        assert!(permit.is_trial());
        breaker.record_outcome(permit, false);
        observed.push(breaker.snapshot().backoff_ms);
    }

    assert_eq!(observed, vec![30_000, 60_000, 120_000, 240_000, 300_000, 300_000]);
}

/// Only one trial runs while half-open
#[test]
fn test_single_trial_while_half_open() {
    let clock = manual_clock();
    let breaker = CircuitBreaker::new("analysis", CircuitBreakerConfig::default(), Arc::new(clock.clone()));
    breaker.force_open();
    clock.advance(Duration::from_secs(30));

    let trial = breaker.guard().expect("trial admitted");
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert!(breaker.guard().is_err());

    breaker.record_outcome(trial, true);
    assert_eq!(breaker.state(), CircuitState::Closed);
    let next = breaker.guard().expect("closed circuit admits calls");
    breaker.release(next);
}

/// A timed-out call counts as a breaker failure
#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_failure() {
    let clock = manual_clock();
    let backend = SlowBackend::new(Duration::from_secs(60));
    let gateway = orchestrator(test_config(), backend.clone(), &clock);

    let response = gateway.execute(Operation::Analysis, &premium_user(1), "slow").await;

    assert_failed_with(&response, ErrorKind::BackendTimeout);
    assert_eq!(backend.calls(), 1);
    let snapshot = gateway.breakers().get(Operation::Analysis).snapshot();
    assert_eq!(snapshot.consecutive_failures, 1);
    assert_eq!(snapshot.total_failures, 1);
}

/// Premium callers get a longer deadline
#[tokio::test(start_paused = true)]
async fn test_premium_timeout_is_longer() {
    let clock = manual_clock();
    let gateway = orchestrator(test_config(), SlowBackend::new(Duration::from_secs(6)), &clock);

    let free = gateway.execute(Operation::Chat, &free_user(1), "slow").await;
    let premium = gateway.execute(Operation::Chat, &premium_user(1), "slow").await;

    assert_failed_with(&free, ErrorKind::BackendTimeout);
    assert!(premium.is_success());
}

/// Authentication failures open the circuit immediately and are not retried
#[tokio::test]
async fn test_auth_failure_opens_without_retry() {
    let clock = manual_clock();
    let backend = ScriptedBackend::with_script(vec![Err(BackendError::authentication("bad key"))]);
    let gateway = gateway_orchestrator::GatewayOrchestrator::builder()
        .config(test_config())
        .backend(backend.clone())
        .clock(Arc::new(clock.clone()))
        .retry_policy(RetryPolicy::with_defaults())
        .build()
        .expect("valid configuration");

    let response = gateway.execute(Operation::Enhancement, &premium_user(1), "improve").await;

    assert_failed_with(&response, ErrorKind::BackendAuth);
    assert_eq!(backend.calls(), 1);
    assert_eq!(
        gateway.breakers().get(Operation::Enhancement).state(),
        CircuitState::Open
    );
}

/// Each operation class has its own breaker
#[tokio::test]
async fn test_breakers_are_isolated_per_operation() {
    let clock = manual_clock();
    let gateway = orchestrator(test_config(), ScriptedBackend::failing(5), &clock);
    let user = premium_user(1);
    run_distinct(&gateway, Operation::Chat, &user, 5).await;

    let analysis = gateway.execute(Operation::Analysis, &user, "still fine").await;
    assert!(analysis.is_success());

    let health = gateway.health().await;
    assert_eq!(health.status, HealthStatus::Degraded);
    let open: Vec<Operation> = health
        .operations
        .iter()
        .filter(|o| o.circuit.state == CircuitState::Open)
        .map(|o| o.operation)
        .collect();
    assert_eq!(open, vec![Operation::Chat]);
}
