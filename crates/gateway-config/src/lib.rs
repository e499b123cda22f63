//! # Gateway Config
//!
//! Typed configuration for the governance layer.
//!
//! Configuration is read from YAML or TOML (selected by file extension),
//! overlaid with `GOVERNANCE_*` environment variables and validated before
//! use. Every field has a default, so an empty file is a valid configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod settings;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    apply_env_overrides, apply_env_overrides_from, load_config, load_config_from, parse_config,
    ConfigFormat,
};
pub use settings::{
    BackendSettings, BudgetSettings, CacheSettings, CircuitBreakerSettings, GovernanceConfig,
    MetricsSettings, OperationProfile, OperationProfiles, PricingSettings, QueueSettings,
    RateLimitAlgorithmSetting, RateLimitSettings, RetrySettings, TelemetrySettings,
};
