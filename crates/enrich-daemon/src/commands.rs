//! Command implementations for the enrichment daemon.
//!
//! Handles:
//! - start: Load config, open storage, schedule the pipeline step job
//! - stop: Signal running daemon to stop (via PID file)
//! - status: Check if daemon is running
//! - pipeline: Client-driven runs, single steps and record maintenance
//! - contacts/admin/config: Seeding, storage stats, effective settings

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use enrich_ai::{
    ApiBioGenerator, ApiClient, ApiClientConfig, ApiEmbedder, ApiThesisExtractor, BioGenerator,
    Embedder, MockBioGenerator, MockEmbedder, MockThesisExtractor, ThesisExtractor,
};
use enrich_pipeline::{
    PipelineConfig, PipelineController, PipelineStepper, ProgressSnapshot, ProgressStore,
    RunSummary, SlotProgressStore, StageRunner, StepReport, UnitProcessor,
};
use enrich_scheduler::jobs::{create_pipeline_job, PipelineJobConfig};
use enrich_scheduler::{SchedulerConfig, SchedulerService};
use enrich_storage::Storage;
use enrich_types::{AiSettings, Contact, PipelinePhase, PipelineRecord, Settings};

use crate::cli::{AdminCommands, ContactCommands, ConfigCommands, PipelineCommands};
use crate::seed;

const APP_DIR: &str = "contact-enrichment";

/// Get the PID file path
fn pid_file_path() -> PathBuf {
    // Prefer the per-user runtime dir (Linux); otherwise the cache dir
    directories::BaseDirs::new()
        .and_then(|dirs| dirs.runtime_dir().map(|p| p.join(APP_DIR)))
        .unwrap_or_else(Settings::runtime_dir)
        .join("daemon.pid")
}

fn write_pid_file() -> Result<()> {
    let pid_path = pid_file_path();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&pid_path, std::process::id().to_string())?;
    info!("Wrote PID file: {:?}", pid_path);
    Ok(())
}

fn remove_pid_file() {
    let pid_path = pid_file_path();
    if pid_path.exists() {
        if let Err(e) = fs::remove_file(&pid_path) {
            warn!("Failed to remove PID file: {}", e);
        } else {
            info!("Removed PID file");
        }
    }
}

fn read_pid_file() -> Option<u32> {
    fs::read_to_string(pid_file_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // Signal 0 only checks that the process exists
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(
    config_path: Option<&str>,
    db_path_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(db_path) = db_path_override {
        settings.db_path = db_path.to_string();
    }
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    Ok(settings)
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

pub fn open_storage(settings: &Settings) -> Result<Arc<Storage>> {
    let db_path = settings.expanded_db_path();
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let storage = Storage::open(&db_path)
        .with_context(|| format!("Failed to open storage at {:?}", db_path))?;
    Ok(Arc::new(storage))
}

fn api_key(ai: &AiSettings, env_var: &str) -> Result<String> {
    ai.api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(|| std::env::var(env_var).ok())
        .with_context(|| format!("No API key configured (set ai.api_key or {})", env_var))
}

fn client_config(ai: &AiSettings, base: ApiClientConfig) -> ApiClientConfig {
    let config = base
        .with_embedding_model(&ai.embedding_model)
        .with_timeout(std::time::Duration::from_secs(ai.timeout_secs))
        .with_max_retries(ai.max_retries);
    match &ai.api_base_url {
        Some(url) => config.with_base_url(url),
        None => config,
    }
}

/// Build the unit processor for the configured AI provider.
///
/// Anthropic has no embeddings endpoint, so with `provider = "anthropic"`
/// the embedder talks to OpenAI using `OPENAI_API_KEY`.
pub fn build_processor(settings: &Settings) -> Result<UnitProcessor> {
    let ai = &settings.ai;
    let (bio, thesis, embedder): (Arc<dyn BioGenerator>, Arc<dyn ThesisExtractor>, Arc<dyn Embedder>) =
        match ai.provider.as_str() {
            "mock" => (
                Arc::new(MockBioGenerator::new()),
                Arc::new(MockThesisExtractor::new()),
                Arc::new(MockEmbedder::new(ai.embedding_dimensions)),
            ),
            "openai" => {
                let key = api_key(ai, "OPENAI_API_KEY")?;
                let client = Arc::new(ApiClient::new(client_config(ai, ApiClientConfig::openai(key, &ai.model)))?);
                (
                    Arc::new(ApiBioGenerator::new(client.clone())),
                    Arc::new(ApiThesisExtractor::new(client.clone())),
                    Arc::new(ApiEmbedder::new(client, ai.embedding_dimensions)),
                )
            }
            "anthropic" => {
                let key = api_key(ai, "ANTHROPIC_API_KEY")?;
                let chat = Arc::new(ApiClient::new(client_config(ai, ApiClientConfig::claude(key, &ai.model)))?);
                let embed_key = std::env::var("OPENAI_API_KEY")
                    .context("provider \"anthropic\" needs OPENAI_API_KEY for embeddings")?;
                let embed_config = ApiClientConfig::openai(embed_key, &ai.model)
                    .with_embedding_model(&ai.embedding_model)
                    .with_timeout(std::time::Duration::from_secs(ai.timeout_secs))
                    .with_max_retries(ai.max_retries);
                let embed = Arc::new(ApiClient::new(embed_config)?);
                (
                    Arc::new(ApiBioGenerator::new(chat.clone())),
                    Arc::new(ApiThesisExtractor::new(chat)),
                    Arc::new(ApiEmbedder::new(embed, ai.embedding_dimensions)),
                )
            }
            other => anyhow::bail!("Unknown AI provider: {} (expected openai, anthropic or mock)", other),
        };

    Ok(UnitProcessor::new(bio, thesis, embedder)
        .with_embedding_max_chars(settings.pipeline.embedding_max_chars)
        .with_min_profile_chars(settings.pipeline.min_profile_chars))
}

pub fn build_runner(settings: &Settings, storage: Arc<Storage>) -> Result<Arc<StageRunner>> {
    let processor = Arc::new(build_processor(settings)?);
    Ok(Arc::new(StageRunner::new(
        storage,
        processor,
        PipelineConfig::from(&settings.pipeline),
    )))
}

pub fn build_stepper(settings: &Settings, storage: Arc<Storage>) -> Result<PipelineStepper> {
    let runner = build_runner(settings, storage.clone())?;
    Ok(PipelineStepper::new(runner, storage))
}

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed never
/// resolves, so the other one still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Start the scheduling daemon.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Open RocksDB storage
/// 3. Register the pipeline step job and start the scheduler
/// 4. Handle graceful shutdown on SIGINT/SIGTERM
pub async fn start_daemon(
    config_path: Option<&str>,
    foreground: bool,
    db_path_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<()> {
    let settings = load_settings(config_path, db_path_override, log_level_override)?;
    init_logging(&settings.log_level)?;

    info!("Enrichment daemon starting...");
    info!("Configuration:");
    info!("  Database path: {}", settings.db_path);
    info!("  AI provider: {} ({})", settings.ai.provider, settings.ai.model);
    info!("  Schedule: {} {}", settings.scheduler.cron, settings.scheduler.timezone);
    info!("  Log level: {}", settings.log_level);

    if !foreground {
        warn!("Background mode not supported, running in foreground");
        warn!("Use a process manager (systemd, launchd) for background operation");
    }

    if let Some(pid) = read_pid_file() {
        if pid != std::process::id() && is_process_running(pid) {
            anyhow::bail!("Daemon already running (PID {})", pid);
        }
    }

    let storage = open_storage(&settings)?;
    let stepper = Arc::new(build_stepper(&settings, storage.clone())?);

    let mut scheduler = SchedulerService::new(SchedulerConfig {
        default_timezone: settings.scheduler.timezone.clone(),
        shutdown_timeout_secs: settings.scheduler.shutdown_timeout_secs,
    })
    .await
    .context("Failed to create scheduler")?;

    create_pipeline_job(&scheduler, stepper, PipelineJobConfig::from(&settings.scheduler))
        .await
        .context("Failed to register pipeline job")?;

    write_pid_file()?;
    scheduler.start().await.context("Failed to start scheduler")?;

    shutdown_signal().await;

    let result = scheduler.shutdown().await;
    if let Err(e) = storage.flush() {
        warn!("Failed to flush storage: {}", e);
    }
    remove_pid_file();

    result.context("Scheduler shutdown failed")
}

/// Stop the running daemon by sending SIGTERM.
pub fn stop_daemon() -> Result<()> {
    let pid = read_pid_file().context("No PID file found - daemon may not be running")?;

    if !is_process_running(pid) {
        remove_pid_file();
        anyhow::bail!("Daemon not running (stale PID file removed)");
    }

    info!("Stopping daemon (PID {})", pid);

    #[cfg(unix)]
    {
        unsafe {
            if libc::kill(pid as i32, libc::SIGTERM) != 0 {
                anyhow::bail!("Failed to send SIGTERM to daemon");
            }
        }
        println!("Sent SIGTERM to daemon (PID {})", pid);
    }

    #[cfg(not(unix))]
    {
        anyhow::bail!("Stop command not supported on this platform");
    }

    Ok(())
}

pub fn show_status() -> Result<()> {
    let pid_path = pid_file_path();

    match read_pid_file() {
        Some(pid) if is_process_running(pid) => {
            println!("Enrichment daemon is running (PID {})", pid);
            println!("PID file: {:?}", pid_path);
        }
        Some(pid) => {
            println!(
                "Enrichment daemon is NOT running (stale PID {} in {:?})",
                pid, pid_path
            );
        }
        None => {
            println!("Enrichment daemon is NOT running (no PID file)");
        }
    }
    Ok(())
}

/// SIGUSR1 stream used to toggle pause during a client run.
#[cfg(unix)]
struct PauseSignal(Option<signal::unix::Signal>);

#[cfg(unix)]
impl PauseSignal {
    fn new() -> Self {
        match signal::unix::signal(signal::unix::SignalKind::user_defined1()) {
            Ok(sig) => Self(Some(sig)),
            Err(e) => {
                warn!("SIGUSR1 unavailable, pause toggling disabled: {}", e);
                Self(None)
            }
        }
    }

    async fn recv(&mut self) {
        if let Some(sig) = self.0.as_mut() {
            if sig.recv().await.is_some() {
                return;
            }
            self.0 = None;
        }
        std::future::pending::<()>().await
    }
}

#[cfg(not(unix))]
struct PauseSignal;

#[cfg(not(unix))]
impl PauseSignal {
    fn new() -> Self {
        Self
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await
    }
}

fn format_snapshot(snapshot: &ProgressSnapshot) -> String {
    format!(
        "[{}] batch {}/{} | {}/{} contacts | enrichment {}/{} ok | thesis {}/{} ok | embedding {}/{} ok",
        snapshot.status,
        snapshot.batch_index,
        snapshot.total_batches,
        snapshot.processed,
        snapshot.total,
        snapshot.enrichment.succeeded,
        snapshot.enrichment.processed,
        snapshot.thesis.succeeded,
        snapshot.thesis.processed,
        snapshot.embedding.succeeded,
        snapshot.embedding.processed,
    )
}

/// Run (or resume) one owner's pipeline in this process.
///
/// Ctrl+C requests a stop after the current batch; SIGUSR1 toggles pause.
/// Progress is printed at every batch boundary.
pub async fn run_owner(settings: &Settings, owner_id: &str, resume: bool) -> Result<RunSummary> {
    let storage = open_storage(settings)?;
    let runner = build_runner(settings, storage.clone())?;
    let progress = Arc::new(SlotProgressStore::new(storage.clone(), owner_id));
    let controller = Arc::new(PipelineController::new(owner_id, runner, progress).with_lease(storage.clone()));

    let mut updates = controller.subscribe();
    let mut task = {
        let controller = controller.clone();
        tokio::spawn(async move {
            if resume {
                controller.resume().await
            } else {
                controller.start().await
            }
        })
    };

    let mut pause_signal = PauseSignal::new();
    let mut stop_requested = false;
    let mut updates_open = true;

    let summary = loop {
        tokio::select! {
            joined = &mut task => {
                break joined.context("Pipeline task panicked")??;
            }
            Ok(()) = signal::ctrl_c(), if !stop_requested => {
                stop_requested = true;
                println!("Stopping after the current batch...");
                controller.stop();
            }
            _ = pause_signal.recv() => {
                if controller.pause_resume() {
                    println!("Paused (send SIGUSR1 again to resume)");
                } else {
                    println!("Resumed");
                }
            }
            changed = updates.changed(), if updates_open => {
                match changed {
                    Ok(()) => println!("{}", format_snapshot(&updates.borrow_and_update())),
                    Err(_) => updates_open = false,
                }
            }
        }
    };

    if let Err(e) = storage.flush() {
        warn!("Failed to flush storage: {}", e);
    }
    Ok(summary)
}

fn format_report(report: &StepReport) -> String {
    let mut line = format!("{}: {:?} (phase {})", report.owner_id, report.outcome, report.phase);
    if let Some(result) = &report.result {
        line.push_str(&format!(
            " | {} {} ok / {} failed in {} batches{}",
            result.stage,
            result.counters.succeeded,
            result.counters.failed,
            result.batches,
            if result.completed { ", stage done" } else { "" },
        ));
    }
    line
}

fn print_record(record: &PipelineRecord) {
    let phase = record
        .progress
        .as_ref()
        .map(|p| p.phase)
        .unwrap_or(PipelinePhase::Idle);
    println!("Owner {}:", record.owner_id);
    println!("  Status:             {}", record.status);
    println!("  Phase:              {}", phase);
    println!("  Completed runs:     {}", record.completed_runs);
    println!("  Consecutive errors: {}", record.consecutive_errors);
    if let Some(error) = &record.last_error {
        println!("  Last error:         {}", error);
    }
    if let Some(at) = record.last_run_at {
        println!("  Last run:           {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(lease) = &record.lease {
        println!(
            "  Lease:              {} until {}",
            lease.holder,
            lease.expires_at.format("%H:%M:%S UTC")
        );
    }
    if let Some(progress) = &record.progress {
        println!(
            "  Progress:           cycle {}, {} batches, enrichment {}/{} thesis {}/{} embedding {}/{}",
            progress.cycle,
            progress.batches_completed,
            progress.enrichment.succeeded,
            progress.enrichment.processed,
            progress.thesis.succeeded,
            progress.thesis.processed,
            progress.embedding.succeeded,
            progress.embedding.processed,
        );
    }
}

/// Handle pipeline subcommands.
pub async fn handle_pipeline(settings: &Settings, command: PipelineCommands) -> Result<()> {
    match command {
        PipelineCommands::Run { owner } => {
            let summary = run_owner(settings, &owner, false).await?;
            println!("{}", summary);
        }
        PipelineCommands::Resume { owner } => {
            let summary = run_owner(settings, &owner, true).await?;
            println!("{}", summary);
        }
        PipelineCommands::Step { owner } => {
            let storage = open_storage(settings)?;
            let stepper = build_stepper(settings, storage)?;
            let reports = match owner {
                Some(owner) => vec![stepper.step_owner(&owner).await?],
                None => stepper.step_all().await?,
            };
            if reports.is_empty() {
                println!("No enrolled owners");
            }
            for report in &reports {
                println!("{}", format_report(report));
            }
        }
        PipelineCommands::Status { owner } => {
            let storage = open_storage(settings)?;
            let stepper = build_stepper(settings, storage.clone())?;
            let records: Vec<PipelineRecord> = match &owner {
                Some(owner) => stepper.status(owner).await?.into_iter().collect(),
                None => stepper.list().await?,
            };
            if records.is_empty() {
                println!("No pipeline records");
            }
            for record in &records {
                print_record(record);
            }

            if let Some(owner) = owner {
                let checkpoint = SlotProgressStore::new(storage, &owner).load().await?;
                match checkpoint {
                    Some(state) => println!(
                        "Client checkpoint: {}/{} processed, {} batches (resume with `pipeline resume --owner {}`)",
                        state.processed_ids.len(),
                        state.total,
                        state.batches_completed,
                        owner
                    ),
                    None => println!("Client checkpoint: none"),
                }
            }
        }
        PipelineCommands::Reset { owner } => {
            let storage = open_storage(settings)?;
            let stepper = build_stepper(settings, storage.clone())?;
            match stepper.reset_owner(&owner).await {
                Ok(_) => println!("Reset pipeline record for {}", owner),
                Err(enrich_pipeline::PipelineError::NotEnrolled(_)) => {
                    println!("{} has no pipeline record", owner)
                }
                Err(e) => return Err(e.into()),
            }
            SlotProgressStore::new(storage, &owner).save(None).await?;
            println!("Discarded client checkpoint for {}", owner);
        }
        PipelineCommands::Enroll { owner } => {
            let storage = open_storage(settings)?;
            let stepper = build_stepper(settings, storage)?;
            let record = stepper.enroll_owner(&owner).await?;
            println!("Enrolled {} (status {})", record.owner_id, record.status);
        }
    }
    Ok(())
}

/// Store contacts that are not already present. Returns (added, skipped).
pub fn seed_contacts(storage: &Storage, contacts: &[Contact]) -> Result<(usize, usize)> {
    let mut added = 0;
    let mut skipped = 0;
    for contact in contacts {
        if storage.get_contact(&contact.owner_id, &contact.id)?.is_some() {
            skipped += 1;
            continue;
        }
        storage
            .put_contact(contact)
            .with_context(|| format!("Failed to store contact {}", contact.id))?;
        added += 1;
    }
    Ok((added, skipped))
}

pub fn handle_contacts(settings: &Settings, command: ContactCommands) -> Result<()> {
    match command {
        ContactCommands::Seed { owner, file } => {
            if !seed::is_json_file(std::path::Path::new(&file)) {
                warn!("{} does not have a .json extension, parsing as JSON anyway", file);
            }
            let contacts = seed::load_contacts(&file, &owner)?;
            let storage = open_storage(settings)?;
            let (added, skipped) = seed_contacts(&storage, &contacts)?;
            storage.flush()?;
            println!(
                "Seeded {} contacts for {} ({} already present)",
                added, owner, skipped
            );
        }
    }
    Ok(())
}

pub fn handle_admin(settings: &Settings, command: AdminCommands) -> Result<()> {
    match command {
        AdminCommands::Stats => {
            let storage = open_storage(settings)?;
            let stats = storage.get_stats()?;
            println!("Database: {:?}", settings.expanded_db_path());
            println!("  Contacts:         {}", stats.contact_count);
            println!("  Theses:           {}", stats.thesis_count);
            println!("  Checkpoints:      {}", stats.checkpoint_count);
            println!("  Pipeline records: {}", stats.pipeline_record_count);
            println!("  Disk usage:       {} bytes", stats.disk_usage_bytes);
        }
    }
    Ok(())
}

/// Effective settings as TOML, with the API key masked.
pub fn render_settings(settings: &Settings) -> Result<String> {
    let mut shown = settings.clone();
    if shown.ai.api_key.is_some() {
        shown.ai.api_key = Some("********".to_string());
    }
    toml::to_string_pretty(&shown).context("Failed to render settings")
}

pub fn handle_config(settings: &Settings, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => print!("{}", render_settings(settings)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mock_settings(dir: &TempDir) -> Settings {
        let mut settings = Settings {
            db_path: dir.path().join("db").to_string_lossy().to_string(),
            ..Default::default()
        };
        settings.ai.provider = "mock".to_string();
        settings.ai.embedding_dimensions = 8;
        settings
    }

    #[test]
    fn test_pid_file_path() {
        let path = pid_file_path();
        assert!(path.ends_with("daemon.pid"));
        assert!(path
            .parent()
            .unwrap()
            .to_string_lossy()
            .contains("contact-enrichment"));
    }

    #[test]
    fn test_status_no_daemon() {
        assert!(show_status().is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let dir = TempDir::new().unwrap();
        let mut settings = mock_settings(&dir);
        settings.ai.provider = "cohere".to_string();
        let err = build_processor(&settings).err().unwrap();
        assert!(err.to_string().contains("Unknown AI provider"));
    }

    #[test]
    fn test_openai_with_configured_key() {
        let dir = TempDir::new().unwrap();
        let mut settings = mock_settings(&dir);
        settings.ai.provider = "openai".to_string();
        settings.ai.api_key = Some("sk-test".to_string());
        assert!(build_processor(&settings).is_ok());
    }

    #[test]
    fn test_render_settings_masks_key() {
        let dir = TempDir::new().unwrap();
        let mut settings = mock_settings(&dir);
        settings.ai.api_key = Some("sk-secret".to_string());

        let rendered = render_settings(&settings).unwrap();
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("[pipeline]"));
        assert!(rendered.contains("provider = \"mock\""));
    }

    #[test]
    fn test_seed_skips_existing() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&mock_settings(&dir)).unwrap();
        let contacts = vec![Contact::new("o", "c-1", "Ada"), Contact::new("o", "c-2", "Grace")];

        assert_eq!(seed_contacts(&storage, &contacts).unwrap(), (2, 0));
        assert_eq!(seed_contacts(&storage, &contacts).unwrap(), (0, 2));
    }

    #[test]
    fn test_format_snapshot() {
        let snapshot = ProgressSnapshot {
            owner_id: "o".to_string(),
            processed: 3,
            total: 7,
            batch_index: 1,
            total_batches: 3,
            ..Default::default()
        };
        let line = format_snapshot(&snapshot);
        assert!(line.starts_with("[idle] batch 1/3 | 3/7 contacts"));
    }
}
