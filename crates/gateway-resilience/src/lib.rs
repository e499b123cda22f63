//! # Gateway Resilience
//!
//! Admission and failure-handling components of the governance layer:
//! - Per-identity rate limiting with premium bypass
//! - Circuit breaker per operation class
//! - Response cache with TTL, namespaces and warming
//! - Advisory two-lane request queue
//! - Retry policy with exponential backoff

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod request_queue;
pub mod response_cache;
pub mod retry;

// Re-export main types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitRejected,
    CircuitSnapshot, CircuitState, Permit,
};
pub use rate_limiter::{
    MemoryRateLimitStore, RateLimitAlgorithm, RateLimitDecision, RateLimitState, RateLimitStore,
    RateLimitStoreError, RateLimiter, RateLimiterConfig, RateLimiterStats, WindowParams,
};
pub use request_queue::{Lane, QueueTicket, RequestQueue, RequestQueueConfig};
pub use response_cache::{
    CacheBackend, CacheEntry, CacheError, CacheKey, CacheResult, CacheStats, MemoryCacheBackend,
    ResponseCache, ResponseCacheConfig, WarmEntry,
};
pub use retry::{RetryConfig, RetryPolicy, RetryPolicyBuilder};
