//! Validate command - check a configuration file.

use anyhow::{Context, Result};
use clap::Args;
use gateway_config::{load_config_from, GovernanceConfig};
use gateway_core::Operation;
use std::path::PathBuf;
use tabled::Tabled;

use crate::output::{self, OutputFormat};

/// Arguments for the validate command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration file to validate (YAML or TOML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Operation profile row.
#[derive(Debug, Tabled)]
struct ProfileRow {
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Max Tokens")]
    max_tokens: u32,
    #[tabled(rename = "Cache TTL")]
    cache_ttl: String,
    #[tabled(rename = "Price/Token")]
    price: String,
}

fn profile_rows(config: &GovernanceConfig) -> Vec<ProfileRow> {
    Operation::ALL
        .iter()
        .map(|op| {
            let profile = config.operations.profile(*op);
            let price = config
                .pricing
                .models
                .get(&profile.model)
                .copied()
                .unwrap_or(config.pricing.default_usd_per_token);
            ProfileRow {
                operation: op.to_string(),
                model: profile.model.clone(),
                max_tokens: profile.max_tokens,
                cache_ttl: output::format_duration(profile.cache_ttl),
                price: format!("${price:.7}"),
            }
        })
        .collect()
}

/// Execute the validate command.
pub async fn execute(args: ValidateArgs) -> Result<()> {
    let config = match load_config_from(&args.config).await {
        Ok(config) => config,
        Err(e) => {
            output::error(&e.to_string());
            return Err(e).with_context(|| format!("invalid configuration {}", args.config.display()));
        }
    };

    if args.format == OutputFormat::Json {
        return output::json(&config);
    }

    output::success(&format!("{} is valid", args.config.display()));

    output::section("Rate Limiting");
    output::key_value("Enabled", &config.rate_limit.enabled.to_string());
    output::key_value(
        "Limit",
        &format!(
            "{} per {}",
            config.rate_limit.limit,
            output::format_duration(config.rate_limit.window)
        ),
    );

    output::section("Circuit Breaker");
    output::key_value(
        "Failure Threshold",
        &config.circuit_breaker.failure_threshold.to_string(),
    );
    output::key_value(
        "Backoff",
        &format!(
            "{} to {} (x{})",
            output::format_duration(config.circuit_breaker.base_backoff),
            output::format_duration(config.circuit_breaker.max_backoff),
            config.circuit_breaker.backoff_multiplier
        ),
    );

    output::section("Cache");
    output::key_value("Enabled", &config.cache.enabled.to_string());
    output::key_value("Max Entries", &config.cache.max_entries.to_string());

    output::section("Budget");
    output::key_value(
        "Monthly Target",
        &output::format_usd(config.budget.monthly_target_usd),
    );
    output::key_value(
        "Alerts",
        &format!(
            "warning {:.0}%, critical {:.0}%",
            config.budget.warning_threshold_pct, config.budget.critical_threshold_pct
        ),
    );

    output::section("Operations");
    output::table(&profile_rows(&config));
    Ok(())
}
