//! Configuration loading.
//!
//! Files are parsed as YAML or TOML based on their extension, then
//! `GOVERNANCE_*` environment variables are applied on top and the result is
//! validated.

use crate::error::{ConfigError, ConfigResult};
use crate::settings::{GovernanceConfig, RateLimitAlgorithmSetting};
use humantime_serde::re::humantime;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Serialization format of a configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML (`.yaml`, `.yml`)
    Yaml,
    /// TOML (`.toml`)
    Toml,
}

impl ConfigFormat {
    /// Detect the format from a file extension
    ///
    /// # Errors
    /// Returns `ConfigError::UnsupportedFormat` for unknown extensions
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            other => Err(ConfigError::UnsupportedFormat(if other.is_empty() {
                path.display().to_string()
            } else {
                other.to_string()
            })),
        }
    }
}

/// Parse configuration text without applying environment overrides
///
/// # Errors
/// Returns `ConfigError::Parse` or `ConfigError::Validation`
pub fn parse_config(content: &str, format: ConfigFormat) -> ConfigResult<GovernanceConfig> {
    let config: GovernanceConfig = if content.trim().is_empty() {
        GovernanceConfig::default()
    } else {
        match format {
            ConfigFormat::Yaml => {
                serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            ConfigFormat::Toml => {
                toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
        }
    };

    config.validate_all()?;
    Ok(config)
}

/// Load configuration from a file and apply environment overrides
///
/// # Errors
/// Returns an error if the file cannot be read, parsed or validated
pub async fn load_config_from(path: &Path) -> ConfigResult<GovernanceConfig> {
    let format = ConfigFormat::from_path(path)?;
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let mut config = parse_config(&content, format)?;
    apply_env_overrides(&mut config)?;
    config.validate_all()?;

    info!(path = %path.display(), ?format, "Configuration loaded");
    Ok(config)
}

/// Load configuration from an optional file, falling back to defaults
///
/// # Errors
/// Returns an error if the file or an override is invalid
pub async fn load_config(path: Option<&Path>) -> ConfigResult<GovernanceConfig> {
    match path {
        Some(path) => load_config_from(path).await,
        None => {
            let mut config = GovernanceConfig::default();
            apply_env_overrides(&mut config)?;
            config.validate_all()?;
            debug!("Using default configuration");
            Ok(config)
        }
    }
}

/// Apply `GOVERNANCE_*` overrides from the process environment
///
/// # Errors
/// Returns `ConfigError::InvalidOverride` for unparseable values
pub fn apply_env_overrides(config: &mut GovernanceConfig) -> ConfigResult<()> {
    apply_env_overrides_from(config, |var| std::env::var(var).ok())
}

/// Apply `GOVERNANCE_*` overrides using a custom variable lookup
///
/// # Errors
/// Returns `ConfigError::InvalidOverride` for unparseable values
pub fn apply_env_overrides_from<F>(config: &mut GovernanceConfig, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.parse::<u32>("GOVERNANCE_RATE_LIMIT")? {
        config.rate_limit.limit = v;
    }
    if let Some(v) = env.duration("GOVERNANCE_RATE_LIMIT_WINDOW")? {
        config.rate_limit.window = v;
    }
    if let Some(v) = env.raw("GOVERNANCE_RATE_LIMIT_ALGORITHM") {
        config.rate_limit.algorithm = match v.as_str() {
            "fixed_window" => RateLimitAlgorithmSetting::FixedWindow,
            "sliding_window" => RateLimitAlgorithmSetting::SlidingWindow,
            other => {
                return Err(ConfigError::invalid_override(
                    "GOVERNANCE_RATE_LIMIT_ALGORITHM",
                    format!("unknown algorithm '{other}'"),
                ))
            }
        };
    }
    if let Some(v) = env.parse::<u32>("GOVERNANCE_BREAKER_FAILURE_THRESHOLD")? {
        config.circuit_breaker.failure_threshold = v;
    }
    if let Some(v) = env.duration("GOVERNANCE_BREAKER_BASE_BACKOFF")? {
        config.circuit_breaker.base_backoff = v;
    }
    if let Some(v) = env.duration("GOVERNANCE_BREAKER_MAX_BACKOFF")? {
        config.circuit_breaker.max_backoff = v;
    }
    if let Some(v) = env.parse::<bool>("GOVERNANCE_CACHE_ENABLED")? {
        config.cache.enabled = v;
    }
    if let Some(v) = env.parse::<usize>("GOVERNANCE_CACHE_MAX_ENTRIES")? {
        config.cache.max_entries = v;
    }
    if let Some(v) = env.parse::<f64>("GOVERNANCE_BUDGET_MONTHLY_TARGET_USD")? {
        config.budget.monthly_target_usd = v;
    }
    if let Some(v) = env.duration("GOVERNANCE_BACKEND_TIMEOUT")? {
        config.backend.timeout = v;
    }
    if let Some(v) = env.parse::<u32>("GOVERNANCE_RETRY_MAX_RETRIES")? {
        config.retry.max_retries = v;
    }
    if let Some(v) = env.raw("GOVERNANCE_LOG_LEVEL") {
        config.telemetry.log_level = v;
    }
    if let Some(v) = env.parse::<bool>("GOVERNANCE_JSON_LOGS")? {
        config.telemetry.json_logs = v;
    }

    Ok(())
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, var: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.raw(var)
            .map(|v| {
                v.parse::<T>()
                    .map_err(|e| ConfigError::invalid_override(var, e.to_string()))
            })
            .transpose()
    }

    fn duration(&self, var: &str) -> ConfigResult<Option<Duration>> {
        self.raw(var)
            .map(|v| {
                humantime::parse_duration(&v)
                    .map_err(|e| ConfigError::invalid_override(var, e.to_string()))
            })
            .transpose()
    }
}
