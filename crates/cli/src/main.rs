//! Disk Pressure Agent CLI
//!
//! A command-line tool for inspecting a node's disk pressure agent:
//! current usage and taint, recent reclamation events and eviction cycles.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{cycles, events, status};

/// Disk Pressure Agent CLI
#[derive(Parser)]
#[command(name = "dpa")]
#[command(author, version, about = "CLI for the Disk Pressure Agent", long_about = None)]
pub struct Cli {
    /// Agent API URL (can also be set via DPA_API_URL env var or the config file)
    #[arg(long, env = "DPA_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show node usage, thresholds, taint and component health
    Status,

    /// Show recent deletions, evictions and taint changes
    Events {
        /// Filter by kind (image, container, pod, taint, cycle, pressure)
        #[arg(long, short)]
        kind: Option<String>,

        /// Maximum number of events
        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },

    /// Show workloads caught in evict/recreate cycles
    Cycles,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let file_config = config::Config::load()?;
    let api_url = file_config.resolve_api_url(cli.api_url);
    let format = cli
        .format
        .or_else(|| output::OutputFormat::from_config(file_config.default_format.as_deref()))
        .unwrap_or_default();

    let client = client::ApiClient::new(&api_url)?;

    match cli.command {
        Commands::Status => status::show_status(&client, format).await?,
        Commands::Events { kind, limit } => {
            events::list_events(&client, kind, limit, format).await?
        }
        Commands::Cycles => cycles::show_cycles(&client, format).await?,
    }

    Ok(())
}
