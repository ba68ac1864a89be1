//! CLI argument parsing for the enrichment daemon.
//!
//! CLI flags override all other config sources.

use clap::{Parser, Subcommand};

/// Contact Enrichment Daemon
///
/// Runs the bio, thesis and embedding stages over a contact database, either
/// on a cron schedule or as a one-off client run.
#[derive(Parser, Debug)]
#[command(name = "enrich-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/contact-enrichment/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the scheduling daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,

        /// Override database path
        #[arg(long)]
        db_path: Option<String>,
    },

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,

    /// Run and inspect the pipeline for one owner
    Pipeline {
        /// Database path (default from config)
        #[arg(long, global = true)]
        db_path: Option<String>,

        #[command(subcommand)]
        command: PipelineCommands,
    },

    /// Manage contacts
    Contacts {
        /// Database path (default from config)
        #[arg(long, global = true)]
        db_path: Option<String>,

        #[command(subcommand)]
        command: ContactCommands,
    },

    /// Administrative commands
    Admin {
        /// Database path (default from config)
        #[arg(long)]
        db_path: Option<String>,

        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum PipelineCommands {
    /// Start a fresh run in this process (Ctrl+C stops, SIGUSR1 pauses)
    Run {
        #[arg(long)]
        owner: String,
    },

    /// Continue an interrupted run from its checkpoint
    Resume {
        #[arg(long)]
        owner: String,
    },

    /// Advance scheduled owners by one stage runner call
    Step {
        /// Only this owner (default: every enrolled owner)
        #[arg(long)]
        owner: Option<String>,
    },

    /// Show pipeline records and checkpoints
    Status {
        /// Only this owner (default: every enrolled owner)
        #[arg(long)]
        owner: Option<String>,
    },

    /// Clear a failed owner and discard its checkpoints
    Reset {
        #[arg(long)]
        owner: String,
    },

    /// Enroll an owner for scheduled runs
    Enroll {
        #[arg(long)]
        owner: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ContactCommands {
    /// Load contacts from a JSON file (array of objects)
    Seed {
        #[arg(long)]
        owner: String,

        /// Path to the JSON file
        #[arg(long)]
        file: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum AdminCommands {
    /// Show database statistics
    Stats,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration (API key redacted)
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_start_foreground() {
        let cli = Cli::parse_from(["enrich-daemon", "start", "--foreground"]);
        match cli.command {
            Commands::Start { foreground, .. } => assert!(foreground),
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_cli_start_with_db_path() {
        let cli = Cli::parse_from(["enrich-daemon", "start", "--db-path", "/custom/db"]);
        match cli.command {
            Commands::Start { db_path, .. } => assert_eq!(db_path, Some("/custom/db".to_string())),
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::parse_from(["enrich-daemon", "--config", "/path/to/config.toml", "start"]);
        assert_eq!(cli.config, Some("/path/to/config.toml".to_string()));
    }

    #[test]
    fn test_cli_with_log_level() {
        let cli = Cli::parse_from(["enrich-daemon", "status", "--log-level", "debug"]);
        assert_eq!(cli.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_cli_stop_and_status() {
        let cli = Cli::parse_from(["enrich-daemon", "stop"]);
        assert!(matches!(cli.command, Commands::Stop));

        let cli = Cli::parse_from(["enrich-daemon", "status"]);
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_cli_pipeline_run() {
        let cli = Cli::parse_from(["enrich-daemon", "pipeline", "run", "--owner", "o-1"]);
        match cli.command {
            Commands::Pipeline { command: PipelineCommands::Run { owner }, .. } => {
                assert_eq!(owner, "o-1")
            }
            _ => panic!("Expected Pipeline Run command"),
        }
    }

    #[test]
    fn test_cli_pipeline_db_path_after_subcommand() {
        let cli = Cli::parse_from([
            "enrich-daemon",
            "pipeline",
            "resume",
            "--owner",
            "o-1",
            "--db-path",
            "/tmp/db",
        ]);
        match cli.command {
            Commands::Pipeline { db_path, command } => {
                assert_eq!(db_path, Some("/tmp/db".to_string()));
                assert!(matches!(command, PipelineCommands::Resume { .. }));
            }
            _ => panic!("Expected Pipeline command"),
        }
    }

    #[test]
    fn test_cli_pipeline_step_all() {
        let cli = Cli::parse_from(["enrich-daemon", "pipeline", "step"]);
        match cli.command {
            Commands::Pipeline { command: PipelineCommands::Step { owner }, .. } => {
                assert!(owner.is_none())
            }
            _ => panic!("Expected Pipeline Step command"),
        }
    }

    #[test]
    fn test_cli_pipeline_requires_owner() {
        let result = Cli::try_parse_from(["enrich-daemon", "pipeline", "run"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_contacts_seed() {
        let cli = Cli::parse_from([
            "enrich-daemon",
            "contacts",
            "seed",
            "--owner",
            "o-1",
            "--file",
            "~/contacts.json",
        ]);
        match cli.command {
            Commands::Contacts { command: ContactCommands::Seed { owner, file }, .. } => {
                assert_eq!(owner, "o-1");
                assert_eq!(file, "~/contacts.json");
            }
            _ => panic!("Expected Contacts Seed command"),
        }
    }

    #[test]
    fn test_cli_admin_stats() {
        let cli = Cli::parse_from(["enrich-daemon", "admin", "--db-path", "/tmp/db", "stats"]);
        match cli.command {
            Commands::Admin { db_path, command } => {
                assert_eq!(db_path, Some("/tmp/db".to_string()));
                assert!(matches!(command, AdminCommands::Stats));
            }
            _ => panic!("Expected Admin command"),
        }
    }

    #[test]
    fn test_cli_config_show() {
        let cli = Cli::parse_from(["enrich-daemon", "config", "show"]);
        assert!(matches!(cli.command, Commands::Config { command: ConfigCommands::Show }));
    }
}
