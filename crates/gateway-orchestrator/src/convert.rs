//! Settings to component configuration.

use gateway_config::{
    BudgetSettings, CacheSettings, CircuitBreakerSettings, MetricsSettings, PricingSettings,
    QueueSettings, RateLimitAlgorithmSetting, RateLimitSettings, RetrySettings,
};
use gateway_resilience::{
    CircuitBreakerConfig, RateLimitAlgorithm, RateLimiterConfig, RequestQueueConfig,
    ResponseCacheConfig, RetryConfig,
};
use gateway_telemetry::{Budget, MetricsConfig, PricingTable};

/// Rate limiter configuration from settings
#[must_use]
pub fn rate_limiter_config(settings: &RateLimitSettings) -> RateLimiterConfig {
    RateLimiterConfig {
        enabled: settings.enabled,
        limit: settings.limit,
        window: settings.window,
        algorithm: match settings.algorithm {
            RateLimitAlgorithmSetting::FixedWindow => RateLimitAlgorithm::FixedWindow,
            RateLimitAlgorithmSetting::SlidingWindow => RateLimitAlgorithm::SlidingWindow,
        },
        idle_ttl: settings.idle_ttl,
    }
}

/// Circuit breaker configuration from settings
#[must_use]
pub fn circuit_breaker_config(settings: &CircuitBreakerSettings) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: settings.failure_threshold,
        base_backoff: settings.base_backoff,
        max_backoff: settings.max_backoff,
        backoff_multiplier: settings.backoff_multiplier,
    }
}

/// Response cache configuration from settings
#[must_use]
pub fn cache_config(settings: &CacheSettings) -> ResponseCacheConfig {
    ResponseCacheConfig {
        enabled: settings.enabled,
        max_entries: settings.max_entries,
        default_ttl: settings.default_ttl,
        warm_fraction: settings.warm_fraction,
    }
}

/// Queue configuration from settings
#[must_use]
pub fn queue_config(settings: &QueueSettings) -> RequestQueueConfig {
    RequestQueueConfig {
        default_latency: settings.default_latency,
        ticket_ttl: settings.ticket_ttl,
    }
}

/// Retry configuration from settings
#[must_use]
pub fn retry_config(settings: &RetrySettings) -> RetryConfig {
    RetryConfig {
        max_retries: settings.max_retries,
        base_delay: settings.base_delay,
        max_delay: settings.max_delay,
        multiplier: settings.multiplier,
        jitter: settings.jitter.clamp(0.0, 1.0),
    }
}

/// Metrics configuration from settings
#[must_use]
pub fn metrics_config(settings: &MetricsSettings) -> MetricsConfig {
    MetricsConfig::default()
        .with_retention(settings.retention)
        .with_latency_sample_size(settings.latency_sample_size)
        .with_prometheus_prefix(settings.prometheus_prefix.clone())
}

/// Price table from settings
#[must_use]
pub fn pricing_table(settings: &PricingSettings) -> PricingTable {
    settings
        .models
        .iter()
        .fold(PricingTable::new(settings.default_usd_per_token), |table, (model, price)| {
            table.with_model(model.clone(), *price)
        })
}

/// Budget from settings
#[must_use]
pub fn budget(settings: &BudgetSettings) -> Budget {
    Budget::new(settings.monthly_target_usd)
        .with_thresholds(settings.warning_threshold_pct, settings.critical_threshold_pct)
}
