//! CoS CLI entry point

use anyhow::{Context, Result};
use clap::Parser;

use cos::cli::{commands, Cli, Commands};
use cos::infrastructure::config::ConfigLoader;
use cos::infrastructure::logging;
use cos::infrastructure::paths::DataPaths;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::load().context("Failed to load configuration")?;
    let paths = DataPaths::new(&config.work_dir);

    // The daemon gets the full subscriber (with the rotating file); one-shot
    // commands keep quiet unless RUST_LOG says otherwise.
    let _guard = if matches!(cli.command, Commands::Run) {
        Some(logging::init(&config.logging, &paths.log_dir()).context("Failed to set up logging")?)
    } else {
        None
    };

    match cli.command {
        Commands::Run => commands::handle_run(paths).await?,
        Commands::Status => commands::handle_status(paths, cli.json).await?,
        Commands::Trigger { task_type, app } => {
            commands::handle_trigger(paths, &task_type, app, cli.json).await?;
        }
        Commands::Pause { reason } => commands::handle_pause(paths, reason).await?,
        Commands::Resume => commands::handle_resume(paths).await?,
    }

    Ok(())
}
