//! Pulse control CLI
//!
//! A command-line tool for inspecting the autoscaling control plane:
//! current score and signals, decision history, and daemon health.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{decisions, health, status};

/// Pulse control CLI
#[derive(Parser)]
#[command(name = "pulsectl")]
#[command(author, version, about = "CLI for the Pulse autoscaling control plane", long_about = None)]
pub struct Cli {
    /// Daemon API URL (can also be set via PULSE_API_URL env var)
    #[arg(long, env = "PULSE_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the latest decision-loop snapshot
    Status,

    /// Show recent control decisions
    Decisions {
        /// Maximum entries to display
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show daemon component health and readiness
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = client::ApiClient::new(&cli.api_url)?;

    let result = match cli.command {
        Commands::Status => status::show_status(&client, cli.format).await,
        Commands::Decisions { limit } => {
            decisions::show_decisions(&client, limit, cli.format).await
        }
        Commands::Health => health::show_health(&client, cli.format).await,
    };

    if let Err(err) = &result {
        output::print_error(&format!("{err:#}"));
    }
    result
}
