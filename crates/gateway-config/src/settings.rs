//! Configuration sections.

use crate::error::{ConfigError, ConfigResult};
use gateway_core::Operation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use validator::Validate;

/// Root configuration for the governance layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Per-identity rate limiting
    #[validate(nested)]
    pub rate_limit: RateLimitSettings,

    /// Circuit breaker guarding the backend
    #[validate(nested)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Response cache
    #[validate(nested)]
    pub cache: CacheSettings,

    /// Monthly budget
    #[validate(nested)]
    pub budget: BudgetSettings,

    /// Model pricing
    pub pricing: PricingSettings,

    /// Advisory request queue
    pub queue: QueueSettings,

    /// Backend retry policy
    #[validate(nested)]
    pub retry: RetrySettings,

    /// Backend call settings
    #[validate(nested)]
    pub backend: BackendSettings,

    /// Per-operation model, token and TTL profiles
    #[validate(nested)]
    pub operations: OperationProfiles,

    /// Metrics log settings
    #[validate(nested)]
    pub metrics: MetricsSettings,

    /// Logging and tracing
    pub telemetry: TelemetrySettings,
}

impl GovernanceConfig {
    /// Validate field ranges and cross-field constraints
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` describing the first violation
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.validate()?;

        if self.budget.warning_threshold_pct >= self.budget.critical_threshold_pct {
            return Err(ConfigError::validation(format!(
                "budget.warning_threshold_pct ({}) must be below budget.critical_threshold_pct ({})",
                self.budget.warning_threshold_pct, self.budget.critical_threshold_pct
            )));
        }

        if self.rate_limit.window.is_zero() {
            return Err(ConfigError::validation("rate_limit.window must be non-zero"));
        }

        if self.circuit_breaker.base_backoff.is_zero() {
            return Err(ConfigError::validation(
                "circuit_breaker.base_backoff must be non-zero",
            ));
        }

        if self.circuit_breaker.max_backoff < self.circuit_breaker.base_backoff {
            return Err(ConfigError::validation(
                "circuit_breaker.max_backoff must not be below base_backoff",
            ));
        }

        if self.retry.max_delay < self.retry.base_delay {
            return Err(ConfigError::validation(
                "retry.max_delay must not be below retry.base_delay",
            ));
        }

        if self.backend.timeout.is_zero() {
            return Err(ConfigError::validation("backend.timeout must be non-zero"));
        }

        if self.pricing.default_usd_per_token < 0.0 {
            return Err(ConfigError::validation(
                "pricing.default_usd_per_token must not be negative",
            ));
        }

        if let Some((model, price)) = self.pricing.models.iter().find(|(_, p)| **p < 0.0) {
            return Err(ConfigError::validation(format!(
                "pricing.models.{model} has negative price {price}"
            )));
        }

        for operation in Operation::ALL {
            let profile = self.operations.profile(operation);
            if profile.model.trim().is_empty() {
                return Err(ConfigError::validation(format!(
                    "operations.{operation}.model must not be empty"
                )));
            }
        }

        Ok(())
    }
}

/// Rate limiting algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithmSetting {
    /// Fixed window anchored at the first request of the window
    #[default]
    FixedWindow,
    /// Sliding window over a per-identity request log
    SlidingWindow,
}

/// Rate limiter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Enable rate limiting for free identities
    pub enabled: bool,

    /// Requests allowed per window
    #[validate(range(min = 1))]
    pub limit: u32,

    /// Window duration
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Algorithm
    pub algorithm: RateLimitAlgorithmSetting,

    /// Idle states older than this are pruned
    #[serde(with = "humantime_serde")]
    pub idle_ttl: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 20,
            window: Duration::from_secs(3600),
            algorithm: RateLimitAlgorithmSetting::FixedWindow,
            idle_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures before the circuit opens
    #[validate(range(min = 1))]
    pub failure_threshold: u32,

    /// Backoff applied on the first opening
    #[serde(with = "humantime_serde")]
    pub base_backoff: Duration,

    /// Upper bound for the backoff
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Backoff multiplier applied on each failed trial
    #[validate(range(min = 1.0))]
    pub backoff_multiplier: f64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

/// Response cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CacheSettings {
    /// Enable response caching
    pub enabled: bool,

    /// Maximum entries held by the in-memory store
    #[validate(range(min = 1))]
    pub max_entries: usize,

    /// TTL used when an operation profile does not specify one
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    /// Share of free slots that warming may fill
    #[validate(range(min = 0.0, max = 0.3))]
    pub warm_fraction: f64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            default_ttl: Duration::from_secs(3600),
            warm_fraction: 0.3,
        }
    }
}

/// Monthly budget settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BudgetSettings {
    /// Monthly spend target in USD
    #[validate(range(min = 0.0))]
    pub monthly_target_usd: f64,

    /// Warning threshold as a percentage of the target
    #[validate(range(min = 0.0, max = 1000.0))]
    pub warning_threshold_pct: f64,

    /// Critical threshold as a percentage of the target
    #[validate(range(min = 0.0, max = 1000.0))]
    pub critical_threshold_pct: f64,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            monthly_target_usd: 50.0,
            warning_threshold_pct: 80.0,
            critical_threshold_pct: 100.0,
        }
    }
}

/// Model pricing table (USD per token)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingSettings {
    /// Price for models missing from the table
    pub default_usd_per_token: f64,

    /// Per-model price
    pub models: BTreeMap<String, f64>,
}

impl Default for PricingSettings {
    fn default() -> Self {
        let models = [
            ("claude-3-5-haiku", 0.000_004),
            ("claude-3-5-sonnet", 0.000_015),
            ("gpt-4o", 0.000_010),
            ("gpt-4o-mini", 0.000_000_6),
        ]
        .into_iter()
        .map(|(model, price)| (model.to_string(), price))
        .collect();

        Self {
            default_usd_per_token: 0.000_002,
            models,
        }
    }
}

/// Advisory queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Latency assumed before any backend call has been observed
    #[serde(with = "humantime_serde")]
    pub default_latency: Duration,

    /// Tickets older than this are swept
    #[serde(with = "humantime_serde")]
    pub ticket_ttl: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            default_latency: Duration::from_secs(2),
            ticket_ttl: Duration::from_secs(300),
        }
    }
}

/// Retry settings for retryable backend failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum retries after the first attempt
    #[validate(range(max = 10))]
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Upper bound for retry delays
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Backoff multiplier
    #[validate(range(min = 1.0))]
    pub multiplier: f64,

    /// Jitter factor (0.0 - 1.0)
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Backend call settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BackendSettings {
    /// Timeout for free-tier calls
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Multiplier applied to the timeout for premium callers
    #[validate(range(min = 1.0, max = 10.0))]
    pub premium_timeout_multiplier: f64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            premium_timeout_multiplier: 1.5,
        }
    }
}

impl BackendSettings {
    /// Timeout for the given tier
    #[must_use]
    pub fn timeout_for(&self, premium: bool) -> Duration {
        if premium {
            self.timeout.mul_f64(self.premium_timeout_multiplier)
        } else {
            self.timeout
        }
    }
}

/// Model, token and cache TTL profile of an operation class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct OperationProfile {
    /// Model used for the operation
    pub model: String,

    /// Max tokens requested from the backend
    #[validate(range(min = 1))]
    pub max_tokens: u32,

    /// TTL for cached responses
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
}

impl OperationProfile {
    fn new(model: &str, max_tokens: u32, cache_ttl_secs: u64) -> Self {
        Self {
            model: model.to_string(),
            max_tokens,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
        }
    }
}

/// Profiles for every operation class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct OperationProfiles {
    /// Project analysis
    #[validate(nested)]
    pub analysis: OperationProfile,
    /// Suggestions
    #[validate(nested)]
    pub suggestions: OperationProfile,
    /// Prompt enhancement
    #[validate(nested)]
    pub enhancement: OperationProfile,
    /// Chat
    #[validate(nested)]
    pub chat: OperationProfile,
}

impl Default for OperationProfiles {
    fn default() -> Self {
        Self {
            analysis: OperationProfile::new("claude-3-5-haiku", 1024, 24 * 3600),
            suggestions: OperationProfile::new("claude-3-5-haiku", 512, 6 * 3600),
            enhancement: OperationProfile::new("claude-3-5-sonnet", 2048, 3600),
            chat: OperationProfile::new("claude-3-5-haiku", 1024, 900),
        }
    }
}

impl OperationProfiles {
    /// Profile for an operation class
    #[must_use]
    pub fn profile(&self, operation: Operation) -> &OperationProfile {
        match operation {
            Operation::Analysis => &self.analysis,
            Operation::Suggestions => &self.suggestions,
            Operation::Enhancement => &self.enhancement,
            Operation::Chat => &self.chat,
        }
    }
}

/// Metrics log settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MetricsSettings {
    /// Records older than this are pruned
    #[serde(with = "humantime_serde")]
    pub retention: Duration,

    /// Backend calls included in the moving-average latency
    #[validate(range(min = 1))]
    pub latency_sample_size: usize,

    /// Prefix for Prometheus metric names
    pub prometheus_prefix: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(35 * 24 * 3600),
            latency_sample_size: 50,
            prometheus_prefix: "ai_governance".to_string(),
        }
    }
}

/// Logging and tracing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Log level or `EnvFilter` directive
    pub log_level: String,

    /// Emit JSON log lines
    pub json_logs: bool,

    /// Install an OpenTelemetry tracer provider
    pub otel_enabled: bool,

    /// Service name reported in traces
    pub service_name: String,

    /// Deployment environment
    pub environment: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            otel_enabled: false,
            service_name: "ai-gateway-governance".to_string(),
            environment: "development".to_string(),
        }
    }
}
