//! Health summary of the governance components.

use gateway_core::Operation;
use gateway_resilience::{CacheStats, CircuitSnapshot, CircuitState, RateLimiterStats};
use gateway_telemetry::BudgetStatus;
use serde::{Deserialize, Serialize};

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All breakers closed and the cache reachable
    Healthy,
    /// Serving, but some operation class or the cache is impaired
    Degraded,
    /// Every operation class is rejecting calls
    Unhealthy,
}

/// Circuit state of one operation class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationHealth {
    /// Operation class
    pub operation: Operation,
    /// Breaker snapshot
    pub circuit: CircuitSnapshot,
}

/// Health summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayHealth {
    /// Overall status
    pub status: HealthStatus,
    /// Cache backend answered a ping
    pub cache_healthy: bool,
    /// Entries in the cache, when the backend reports it
    pub cache_entries: Option<usize>,
    /// Cache counters
    pub cache: CacheStats,
    /// Per-operation circuit state
    pub operations: Vec<OperationHealth>,
    /// Premium lane length
    pub queue_premium: usize,
    /// Free lane length
    pub queue_free: usize,
    /// Rate limiter counters
    pub rate_limiter: RateLimiterStats,
    /// Current month spend against the budget
    pub budget: BudgetStatus,
}

impl GatewayHealth {
    pub(crate) fn status_for(cache_healthy: bool, operations: &[OperationHealth]) -> HealthStatus {
        let open = operations
            .iter()
            .filter(|o| o.circuit.state == CircuitState::Open)
            .count();
        if !operations.is_empty() && open == operations.len() {
            HealthStatus::Unhealthy
        } else if !cache_healthy
            || operations
                .iter()
                .any(|o| o.circuit.state != CircuitState::Closed)
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
