// src/main.rs

use anyhow::Result;
use clap::Parser;
use tracing::debug;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Run { config } => {
            debug!(config = ?config, "run");
            commands::cmd_run(config.as_deref())
        }
        Commands::Sort { lockfile } => commands::cmd_sort(&lockfile),
        Commands::Inspect {
            reference,
            registry,
        } => commands::cmd_inspect(&reference, &registry),
        Commands::Config { config } => commands::cmd_config(config.as_deref()),
    }
}
