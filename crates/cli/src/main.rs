//! Everloop CLI — the main entry point.
//!
//! Commands:
//! - `run`         — Start the always-on agent loop
//! - `consolidate` — Run one memory-consolidation batch and exit
//! - `doctor`      — Diagnose configuration and storage health

use clap::{Parser, Subcommand};

mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "everloop",
    about = "Everloop — always-on autonomous agent runtime",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the always-on agent loop
    Run {
        /// Override the standing directive for this session
        #[arg(short, long)]
        directive: Option<String>,
    },

    /// Run one consolidation batch and exit
    Consolidate,

    /// Diagnose configuration and storage health
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run { directive } => commands::run::run(directive).await?,
        Commands::Consolidate => commands::consolidate::run().await?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
