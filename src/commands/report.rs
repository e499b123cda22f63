//! Report command - cost analysis over a metrics log.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use gateway_config::load_config;
use gateway_orchestrator::convert;
use gateway_telemetry::{read_jsonl, CostAnalysisReport};
use std::path::PathBuf;
use tracing::info;

use crate::output::{self, OutputFormat};

/// Arguments for the report command.
#[derive(Args, Debug)]
pub struct ReportArgs {
    /// JSON-lines metrics log exported by the governance layer
    #[arg(short, long)]
    pub metrics: PathBuf,

    /// Configuration file supplying budget and pricing
    #[arg(short, long, env = "GOVERNANCE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Build the report for the given arguments.
pub async fn build_report(args: &ReportArgs) -> Result<CostAnalysisReport> {
    let config = load_config(args.config.as_deref())
        .await
        .context("failed to load configuration")?;
    let entries = read_jsonl(&args.metrics)
        .await
        .with_context(|| format!("failed to read metrics log {}", args.metrics.display()))?;

    info!(entries = entries.len(), path = %args.metrics.display(), "Metrics log loaded");

    Ok(CostAnalysisReport::generate(
        &entries,
        &convert::budget(&config.budget),
        &convert::pricing_table(&config.pricing),
        Utc::now(),
    ))
}

/// Execute the report command.
pub async fn execute(args: ReportArgs) -> Result<()> {
    let report = build_report(&args).await?;

    match args.format {
        OutputFormat::Json => output::json(&report)?,
        OutputFormat::Text => print!("{}", report.render_text()),
    }

    if !report.budget.within_budget {
        output::warning(&format!(
            "Projected monthly spend {} exceeds the {} target",
            output::format_usd(report.budget.projected_monthly_cost),
            output::format_usd(report.budget.monthly_target)
        ));
    }
    Ok(())
}
