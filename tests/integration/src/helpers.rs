//! Test helper utilities for integration tests

use gateway_config::GovernanceConfig;
use gateway_core::{AiBackend, Identity, ManualClock, Operation};
use gateway_orchestrator::{GatewayOrchestrator, GatewayResponse};
use gateway_resilience::RetryPolicy;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for tests (only once)
static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
});

/// Initialize tracing for tests
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// Build an orchestrator over `backend` with no retries
pub fn orchestrator(
    config: GovernanceConfig,
    backend: Arc<dyn AiBackend>,
    clock: &ManualClock,
) -> GatewayOrchestrator {
    init_tracing();
    GatewayOrchestrator::builder()
        .config(config)
        .backend(backend)
        .clock(Arc::new(clock.clone()))
        .retry_policy(RetryPolicy::none())
        .build()
        .expect("valid configuration")
}

/// Run `n` requests with distinct prompts, returning every response
pub async fn run_distinct(
    gateway: &GatewayOrchestrator,
    operation: Operation,
    identity: &Identity,
    n: usize,
) -> Vec<GatewayResponse> {
    let mut responses = Vec::with_capacity(n);
    for i in 0..n {
        responses.push(gateway.execute(operation, identity, &crate::prompt(i)).await);
    }
    responses
}

/// Assert that a response failed with the given error kind
pub fn assert_failed_with(response: &GatewayResponse, kind: gateway_core::ErrorKind) {
    assert!(!response.is_success(), "expected failure, got {response:?}");
    assert_eq!(response.error_kind(), Some(kind), "unexpected error in {response:?}");
    assert!(response.fallback_recommended());
}
