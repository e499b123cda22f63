//! CLI argument definitions using clap.

use anyhow::Result;
use clap::{Parser, Subcommand};
use gateway_telemetry::TracingConfig;

use crate::commands;

/// Governance layer for generative-AI backend calls
#[derive(Parser, Debug)]
#[command(name = "ai-gateway-governance")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, env = "GOVERNANCE_JSON_LOGS", global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Produce a cost analysis report from a metrics log
    Report(commands::report::ReportArgs),

    /// Validate a configuration file
    Validate(commands::validate::ValidateArgs),
}

impl Cli {
    /// Logging setup for the chosen verbosity
    pub fn tracing_config(&self) -> TracingConfig {
        let level = match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        TracingConfig::default()
            .with_log_level(level)
            .with_json_logs(self.json_logs)
    }

    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Report(args) => commands::report::execute(args).await,
            Commands::Validate(args) => commands::validate::execute(args).await,
        }
    }
}
