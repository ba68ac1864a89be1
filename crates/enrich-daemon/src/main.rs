//! Contact Enrichment Daemon
//!
//! Runs the enrichment pipeline (bio -> thesis -> embedding) over a contact
//! database, on a cron schedule or on demand.
//!
//! # Usage
//!
//! ```bash
//! enrich-daemon start [--foreground] [--db-path PATH]
//! enrich-daemon stop
//! enrich-daemon status
//! enrich-daemon pipeline run --owner OWNER
//! enrich-daemon pipeline step [--owner OWNER]
//! enrich-daemon contacts seed --owner OWNER --file contacts.json
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/contact-enrichment/config.toml)
//! 3. Environment variables (ENRICH_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use enrich_daemon::{
    handle_admin, handle_config, handle_contacts, handle_pipeline, init_logging, load_settings,
    show_status, start_daemon, stop_daemon, Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config.as_deref();
    let log_level = cli.log_level.as_deref();

    match cli.command {
        Commands::Start {
            foreground,
            db_path,
        } => {
            start_daemon(config, foreground, db_path.as_deref(), log_level).await?;
        }
        Commands::Stop => {
            stop_daemon()?;
        }
        Commands::Status => {
            show_status()?;
        }
        Commands::Pipeline { db_path, command } => {
            let settings = load_settings(config, db_path.as_deref(), log_level)?;
            init_logging(&settings.log_level)?;
            handle_pipeline(&settings, command).await?;
        }
        Commands::Contacts { db_path, command } => {
            let settings = load_settings(config, db_path.as_deref(), log_level)?;
            init_logging(&settings.log_level)?;
            handle_contacts(&settings, command)?;
        }
        Commands::Admin { db_path, command } => {
            let settings = load_settings(config, db_path.as_deref(), log_level)?;
            handle_admin(&settings, command)?;
        }
        Commands::Config { command } => {
            let settings = load_settings(config, None, log_level)?;
            handle_config(&settings, command)?;
        }
    }

    Ok(())
}
