//! Enrichment daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (daemon lifecycle, pipeline, admin)
//! - `seed`: Contact import from JSON files

pub mod cli;
pub mod commands;
pub mod seed;

pub use cli::{AdminCommands, Cli, Commands, ConfigCommands, ContactCommands, PipelineCommands};
pub use commands::{
    build_processor, build_runner, build_stepper, handle_admin, handle_config, handle_contacts,
    handle_pipeline, init_logging, load_settings, open_storage, run_owner, seed_contacts,
    show_status, start_daemon, stop_daemon,
};
