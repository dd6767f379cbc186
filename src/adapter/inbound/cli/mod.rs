//! CLI module graph.

pub mod check;
pub mod command;
pub mod dead_letter;
pub mod output;
pub mod serve;

use crate::error::Result;
use crate::infrastructure::config::settings::Config;
use command::{Cli, Commands};

/// Load configuration and run the selected command.
///
/// # Errors
/// Returns configuration errors and whatever the command itself reports.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = Config::from_sources(cli.config.as_deref())?;
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve::execute(config).await,
        Commands::CheckConfig => check::execute(&config),
        Commands::DeadLetters(args) => dead_letter::execute(&config, &args).await,
    }
}
