//! Command-line interface definitions.
//!
//! Defines the CLI structure for the eventgate binary using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Webhook event-ingestion gateway
#[derive(Parser, Debug)]
#[command(name = "eventgate")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML configuration file. Environment variables override it.
    #[arg(short, long, global = true, env = "EVENTGATE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Top-level subcommands. `serve` runs when none is given.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the gateway (HTTP intake, dispatcher and background loops)
    Serve,

    /// Validate configuration and print the effective settings
    CheckConfig,

    /// Inspect the dead-letter file
    DeadLetters(DeadLetterArgs),
}

/// Arguments for `eventgate dead-letters`.
#[derive(Args, Debug, Default)]
pub struct DeadLetterArgs {
    /// Show at most this many events (newest last).
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Print the events as NDJSON instead of a summary table.
    #[arg(long)]
    pub json: bool,
}
