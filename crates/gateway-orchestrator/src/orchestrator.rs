//! Governed execution of AI backend calls.
//!
//! [`GatewayOrchestrator::execute`] runs every request through, in order:
//! 1. per-identity rate limiting (denied callers get a queue ticket)
//! 2. the circuit breaker of the operation class (blocked callers are queued too)
//! 3. the response cache
//! 4. the backend call under a tier-dependent timeout, with retries
//!
//! and records exactly one metrics entry and one spend record for every
//! request that passes admission.

use crate::convert;
use crate::health::{GatewayHealth, OperationHealth};
use crate::response::GatewayResponse;
use gateway_config::{BackendSettings, GovernanceConfig, OperationProfile, OperationProfiles};
use gateway_core::{
    AiBackend, BackendError, BackendRequest, BackendResponse, Clock, ErrorKind, GovernanceError,
    GovernanceResult, Identity, LatencyEstimator, Operation, SystemClock,
};
use gateway_resilience::{
    CacheBackend, CacheKey, CircuitBreaker, CircuitBreakerRegistry, Lane, MemoryRateLimitStore,
    Permit, QueueTicket, RateLimitDecision, RateLimitStore, RateLimiter, RequestQueue,
    ResponseCache, RetryPolicy, WarmEntry,
};
use gateway_telemetry::{
    BudgetAlert, CostRecord, CostTracker, MetricEntry, MetricsService,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Counts from one housekeeping pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Idle rate-limit windows removed
    pub idle_rate_limits: usize,
    /// Stale queue tickets removed
    pub stale_tickets: usize,
    /// Metric entries past retention removed
    pub expired_metrics: usize,
    /// Spend records past retention removed
    pub expired_cost_records: usize,
}

/// Outcome of the backend attempt loop
struct AttemptOutcome {
    result: Result<BackendResponse, GovernanceError>,
    attempts: u32,
    retry_after_ms: Option<u64>,
}

/// Governance layer in front of an AI backend
pub struct GatewayOrchestrator {
    backend: Arc<dyn AiBackend>,
    clock: Arc<dyn Clock>,
    rate_limiter: Arc<RateLimiter>,
    breakers: Arc<CircuitBreakerRegistry>,
    cache: Arc<ResponseCache>,
    costs: Arc<CostTracker>,
    queue: Arc<RequestQueue>,
    metrics: Arc<MetricsService>,
    retry: RetryPolicy,
    backend_settings: BackendSettings,
    operations: OperationProfiles,
    retention: Duration,
}

impl std::fmt::Debug for GatewayOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayOrchestrator")
            .field("backend", &self.backend.name())
            .field("retry", &self.retry)
            .field("backend_settings", &self.backend_settings)
            .finish_non_exhaustive()
    }
}

impl GatewayOrchestrator {
    /// Start building an orchestrator
    #[must_use]
    pub fn builder() -> GatewayOrchestratorBuilder {
        GatewayOrchestratorBuilder::new()
    }

    /// Build from configuration with default stores
    pub fn from_config(
        config: GovernanceConfig,
        backend: Arc<dyn AiBackend>,
        clock: Arc<dyn Clock>,
    ) -> GovernanceResult<Self> {
        Self::builder()
            .config(config)
            .backend(backend)
            .clock(clock)
            .build()
    }

    /// Run one governed request
    pub async fn execute(
        &self,
        operation: Operation,
        identity: &Identity,
        payload: &str,
    ) -> GatewayResponse {
        let span = gateway_telemetry::governance_span!(operation, identity.id, identity.tier);
        self.execute_inner(operation, identity, payload)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        operation: Operation,
        identity: &Identity,
        payload: &str,
    ) -> GatewayResponse {
        let started = Instant::now();

        if let RateLimitDecision::Denied { retry_after_ms } =
            self.rate_limiter.check_and_consume(identity).await
        {
            let ticket = self.queue.enter(identity);
            self.metrics
                .record_rejection(operation, ErrorKind::RateLimitExceeded);
            info!(
                position = ticket.position,
                retry_after_ms,
                "Rate limited, queue ticket issued"
            );
            return GatewayResponse::rate_limited(ticket, retry_after_ms, elapsed_ms(started));
        }

        let breaker = self.breakers.get(operation);
        let mut permit = match breaker.guard() {
            Ok(permit) => PendingPermit::new(breaker, permit),
            Err(rejected) => {
                let ticket = self.queue.enter(identity);
                self.metrics.record_rejection(operation, ErrorKind::CircuitOpen);
                debug!(
                    retry_after_ms = rejected.retry_after_ms,
                    position = ticket.position,
                    lane = ?ticket.lane,
                    "Circuit open, queue ticket issued"
                );
                return GatewayResponse::unavailable(
                    ticket,
                    operation.as_str(),
                    rejected.retry_after_ms,
                    elapsed_ms(started),
                );
            }
        };

        let profile = self.operations.profile(operation);
        let key = CacheKey::for_request(operation, &profile.model, payload);

        // Dropping the pending permit (cache hit or cancellation here) releases it
        if let Some(cached) = self.cache.get(&key).await {
            drop(permit);
            let latency_ms = elapsed_ms(started);
            self.record_outcome(
                operation,
                identity,
                &profile.model,
                MetricEntry::new(self.clock.now(), operation, &profile.model, identity)
                    .with_latency_ms(latency_ms)
                    .with_cache_hit(true),
            )
            .await;
            return GatewayResponse::cached(cached, latency_ms);
        }

        let request = BackendRequest::new(profile.model.clone(), payload, profile.max_tokens);
        let timeout = self.backend_settings.timeout_for(identity.is_premium());
        let outcome = self
            .call_with_retries(breaker, permit.take(), &request, timeout)
            .await;
        let latency_ms = elapsed_ms(started);
        let now = self.clock.now();

        match outcome.result {
            Ok(response) => {
                self.cache
                    .set(&key, &response.content, Some(profile.cache_ttl))
                    .await;
                let tokens = u64::from(response.tokens_used);
                let cost = self.costs.calculate_request_cost(&profile.model, tokens);
                self.record_outcome(
                    operation,
                    identity,
                    &profile.model,
                    MetricEntry::new(now, operation, &profile.model, identity)
                        .with_latency_ms(latency_ms)
                        .with_tokens(tokens)
                        .with_cost(cost)
                        .with_attempts(outcome.attempts),
                )
                .await;
                GatewayResponse::success(response.content, outcome.attempts, latency_ms)
            }
            Err(error) => {
                warn!(
                    error = %error,
                    kind = %error.kind(),
                    attempts = outcome.attempts,
                    "Governed request failed"
                );
                self.record_outcome(
                    operation,
                    identity,
                    &profile.model,
                    MetricEntry::new(now, operation, &profile.model, identity)
                        .with_latency_ms(latency_ms)
                        .with_error(error.kind())
                        .with_attempts(outcome.attempts),
                )
                .await;
                let response = GatewayResponse::failure(error, outcome.attempts, latency_ms);
                match outcome.retry_after_ms {
                    Some(ms) => response.with_retry_after(ms),
                    None => response,
                }
            }
        }
    }

    /// Attempt loop. Each round holds its own permit; an invalid response is
    /// retried once under the same permit without consuming the retry budget.
    async fn call_with_retries(
        &self,
        breaker: &CircuitBreaker,
        mut permit: Option<Permit>,
        request: &BackendRequest,
        timeout: Duration,
    ) -> AttemptOutcome {
        let mut attempts = 0u32;
        let mut rounds = 0u32;

        loop {
            let current = match permit.take() {
                Some(p) => p,
                None => match breaker.guard() {
                    Ok(p) => p,
                    Err(rejected) => {
                        // Our own failures opened the circuit mid-retry
                        return AttemptOutcome {
                            result: Err(GovernanceError::circuit_open(
                                breaker.name(),
                                rejected.retry_after_ms,
                            )),
                            attempts,
                            retry_after_ms: Some(rejected.retry_after_ms),
                        };
                    }
                },
            };
            rounds += 1;

            attempts += 1;
            let mut result = self.call_once(request, timeout, attempts).await;
            if matches!(result, Err(BackendError::InvalidResponse(_))) {
                debug!(attempt = attempts, "Invalid response format, retrying under the same permit");
                attempts += 1;
                result = self.call_once(request, timeout, attempts).await;
            }

            let error = match result {
                Ok(response) => {
                    breaker.record_outcome(current, true);
                    return AttemptOutcome {
                        result: Ok(response),
                        attempts,
                        retry_after_ms: None,
                    };
                }
                Err(e) => GovernanceError::from_backend(e, attempts),
            };

            breaker.record_outcome(current, false);

            match &error {
                GovernanceError::BackendAuth(_) => {
                    breaker.force_open();
                    return AttemptOutcome {
                        result: Err(error),
                        attempts,
                        retry_after_ms: None,
                    };
                }
                GovernanceError::InvalidResponseFormat(_) => {
                    return AttemptOutcome {
                        result: Err(error),
                        attempts,
                        retry_after_ms: None,
                    };
                }
                _ => {}
            }

            if !self.retry.should_retry(&error, rounds) {
                return AttemptOutcome {
                    result: Err(error),
                    attempts,
                    retry_after_ms: None,
                };
            }

            let delay = self.retry.delay_for_attempt(rounds - 1);
            debug!(
                error = %error,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Retrying backend call"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn call_once(
        &self,
        request: &BackendRequest,
        timeout: Duration,
        attempt: u32,
    ) -> Result<BackendResponse, BackendError> {
        let span = gateway_telemetry::backend_span!(self.backend.name(), request.model, attempt);
        let call = self.backend.complete(request.clone()).instrument(span);
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(response)) if response.content.trim().is_empty() => {
                Err(BackendError::invalid_response("empty completion"))
            }
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn record_outcome(
        &self,
        operation: Operation,
        identity: &Identity,
        model: &str,
        entry: MetricEntry,
    ) {
        let record = CostRecord::new(entry.timestamp, operation, model)
            .with_identity(identity.id.clone())
            .with_usage(entry.tokens_used, entry.cost)
            .with_cache_hit(entry.cache_hit)
            .with_success(entry.success);
        let spent = entry.cost > 0.0;

        self.metrics.record(entry);
        self.costs.record_spend(record).await;
        if spent {
            // Alerts are logged and broadcast by the tracker
            let _ = self.costs.check_budget().await;
        }
    }

    /// Remove a queue ticket
    pub fn leave_queue(&self, ticket: &QueueTicket) -> bool {
        self.queue.leave(ticket)
    }

    /// Current position of a queue ticket
    pub fn queue_position(&self, ticket: &QueueTicket) -> Option<QueueTicket> {
        self.queue.position(ticket)
    }

    /// Pre-populate the cache with known responses.
    ///
    /// Keys are derived exactly as `execute` derives them, so a warmed
    /// `(operation, prompt)` pair is served as a cache hit.
    pub async fn warm_cache(
        &self,
        entries: impl IntoIterator<Item = (Operation, String, String)>,
    ) -> usize {
        let warm: Vec<WarmEntry> = entries
            .into_iter()
            .map(|(operation, prompt, value)| {
                let profile = self.operations.profile(operation);
                WarmEntry {
                    key: CacheKey::for_request(operation, &profile.model, &prompt),
                    value,
                    ttl: profile.cache_ttl,
                }
            })
            .collect();
        self.cache.warm(warm).await
    }

    /// Subscribe to budget alerts
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<BudgetAlert> {
        self.costs.subscribe()
    }

    /// Health summary of all components
    pub async fn health(&self) -> GatewayHealth {
        let cache_healthy = self.cache.health().await;
        let operations: Vec<OperationHealth> = self
            .breakers
            .snapshots()
            .into_iter()
            .map(|(operation, circuit)| OperationHealth { operation, circuit })
            .collect();

        GatewayHealth {
            status: GatewayHealth::status_for(cache_healthy, &operations),
            cache_healthy,
            cache_entries: self.cache.len().await,
            cache: self.cache.stats(),
            operations,
            queue_premium: self.queue.lane_len(Lane::Premium),
            queue_free: self.queue.lane_len(Lane::Free),
            rate_limiter: self.rate_limiter.stats(),
            budget: self.costs.budget_status().await,
        }
    }

    /// Drop idle windows, stale tickets and records past retention
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let report = MaintenanceReport {
            idle_rate_limits: self.rate_limiter.prune_idle().await,
            stale_tickets: self.queue.sweep(),
            expired_metrics: self.metrics.prune_expired(),
            expired_cost_records: self.costs.prune_before(self.clock.now() - retention).await,
        };
        info!(?report, "Maintenance pass complete");
        report
    }

    /// Model profile of an operation class
    #[must_use]
    pub fn profile(&self, operation: Operation) -> &OperationProfile {
        self.operations.profile(operation)
    }

    /// Rate limiter
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Circuit breakers by operation class
    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Response cache
    #[must_use]
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Spend tracker
    #[must_use]
    pub fn cost_tracker(&self) -> &Arc<CostTracker> {
        &self.costs
    }

    /// Request queue
    #[must_use]
    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    /// Metrics service
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsService> {
        &self.metrics
    }
}

/// Permit held before the backend is reached.
///
/// Dropping it releases the permit without an outcome, so a cache hit or a
/// caller cancelled during the cache lookup never counts against the breaker.
/// Once taken, the plain [`Permit`] drop rule applies.
struct PendingPermit<'a> {
    breaker: &'a CircuitBreaker,
    permit: Option<Permit>,
}

impl<'a> PendingPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, permit: Permit) -> Self {
        Self {
            breaker,
            permit: Some(permit),
        }
    }

    fn take(&mut self) -> Option<Permit> {
        self.permit.take()
    }
}

impl Drop for PendingPermit<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.breaker.release(permit);
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Builder for [`GatewayOrchestrator`]
#[derive(Default)]
pub struct GatewayOrchestratorBuilder {
    config: GovernanceConfig,
    backend: Option<Arc<dyn AiBackend>>,
    clock: Option<Arc<dyn Clock>>,
    rate_limit_store: Option<Arc<dyn RateLimitStore>>,
    cache_backend: Option<Arc<dyn CacheBackend>>,
    retry_policy: Option<RetryPolicy>,
}

impl GatewayOrchestratorBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the full configuration
    #[must_use]
    pub fn config(mut self, config: GovernanceConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the AI backend
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn AiBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the clock
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a custom rate limit store
    #[must_use]
    pub fn rate_limit_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.rate_limit_store = Some(store);
        self
    }

    /// Use a custom cache backend
    #[must_use]
    pub fn cache_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.cache_backend = Some(backend);
        self
    }

    /// Override the retry policy from configuration
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Validate the configuration and build the orchestrator
    pub fn build(self) -> GovernanceResult<GatewayOrchestrator> {
        let backend = self
            .backend
            .ok_or_else(|| GovernanceError::configuration("an AI backend is required"))?;
        self.config.validate_all()?;

        let config = self.config;
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let limiter_config = convert::rate_limiter_config(&config.rate_limit);
        let store = self
            .rate_limit_store
            .unwrap_or_else(|| Arc::new(MemoryRateLimitStore::new()));
        let rate_limiter = RateLimiter::with_store(limiter_config, store, Arc::clone(&clock));

        let breakers = CircuitBreakerRegistry::new(
            &convert::circuit_breaker_config(&config.circuit_breaker),
            Arc::clone(&clock),
        );

        let cache_config = convert::cache_config(&config.cache);
        let cache = match self.cache_backend {
            Some(backend) => ResponseCache::with_backend(cache_config, backend, Arc::clone(&clock)),
            None => ResponseCache::new(cache_config, Arc::clone(&clock)),
        };

        let metrics = Arc::new(
            MetricsService::new(convert::metrics_config(&config.metrics), Arc::clone(&clock))
                .map_err(|e| GovernanceError::internal(e.to_string()))?,
        );
        let estimator: Arc<dyn LatencyEstimator> = metrics.clone();
        let queue = RequestQueue::new(convert::queue_config(&config.queue), Arc::clone(&clock))
            .with_latency_estimator(estimator);

        let costs = CostTracker::new(
            convert::pricing_table(&config.pricing),
            convert::budget(&config.budget),
            Arc::clone(&clock),
        );

        let retry = self
            .retry_policy
            .unwrap_or_else(|| RetryPolicy::new(convert::retry_config(&config.retry)));

        info!(
            backend = backend.name(),
            rate_limit = config.rate_limit.limit,
            failure_threshold = config.circuit_breaker.failure_threshold,
            cache_enabled = config.cache.enabled,
            monthly_target_usd = config.budget.monthly_target_usd,
            "Governance layer initialized"
        );

        Ok(GatewayOrchestrator {
            backend,
            clock,
            rate_limiter: Arc::new(rate_limiter),
            breakers: Arc::new(breakers),
            cache: Arc::new(cache),
            costs: Arc::new(costs),
            queue: Arc::new(queue),
            metrics,
            retry,
            backend_settings: config.backend,
            operations: config.operations,
            retention: config.metrics.retention,
        })
    }
}
