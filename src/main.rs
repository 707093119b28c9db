//! smartmark - personal bookmarks synced with a hosted backend
//!
#![doc = "Main entry point for the smartmark CLI."]

use anyhow::Result;

use smartmark::app::AppOptions;
use smartmark::backend::Backend;
use smartmark::cli::{Cli, Commands};
use smartmark::commands;
use smartmark::config::Config;
use smartmark::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let mut config = Config::load(cli.config_path(), &cli)?;

    // Logging is configured from the file, so it starts after loading
    init_logging(&config.logging)?;
    config.report_warnings();

    // Validate configuration
    config.validate()?;

    let backend = Backend::http(&config)?;

    // Execute command
    match cli.command {
        Commands::Login { provider } => {
            let provider = provider.unwrap_or_else(|| config.auth.provider.clone());
            tracing::debug!("Using provider: {}", provider);
            commands::auth::login(&backend, &provider).await?;
        }
        Commands::Logout => commands::auth::logout(&backend).await?,
        Commands::Whoami => {
            commands::auth::whoami(&backend).await?;
        }
        Commands::List { json } => commands::bookmarks::list(&backend, json).await?,
        Commands::Add { title, url } => {
            commands::bookmarks::add(&backend, &title, &url).await?;
        }
        Commands::Delete { id } => commands::bookmarks::delete(&backend, &id).await?,
        Commands::Shell => {
            let options = AppOptions::from_config(&config)?;
            commands::shell::run_shell(backend, options).await?;
        }
    }

    Ok(())
}
