//! # AI Gateway Governance
//!
//! Operator tool for the governance layer.
//!
//! ## Usage
//!
//! ```bash
//! # Cost analysis over an exported metrics log
//! ai-gateway-governance report --metrics metrics.jsonl --config governance.yaml
//!
//! # Machine-readable report
//! ai-gateway-governance report --metrics metrics.jsonl --format json
//!
//! # Check a configuration file
//! ai-gateway-governance validate --config governance.yaml
//! ```

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;
mod output;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let provider = gateway_telemetry::init_tracing(&cli.tracing_config())?;
    let result = cli.execute().await;
    gateway_telemetry::shutdown_tracing(provider);

    result
}
