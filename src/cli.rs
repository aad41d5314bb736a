// src/cli.rs
//! CLI definitions for the crank package manager
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "crank")]
#[command(author = "Crank Project")]
#[command(version)]
#[command(about = "Package manager for declarative cluster platforms", long_about = None)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the package and revision reconcilers until interrupted
    Run {
        /// Manager configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the installation order of a package ledger
    Sort {
        /// Ledger file (YAML or JSON)
        lockfile: PathBuf,
    },

    /// Resolve a package from a registry directory and print what it provides
    Inspect {
        /// Package reference, e.g. registry/provider-aws:v1
        reference: String,

        /// Registry root
        #[arg(short, long, default_value = "/var/lib/crank/registry")]
        registry: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Manager configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
