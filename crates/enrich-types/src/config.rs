//! Configuration loading for the enrichment pipeline.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/contact-enrichment/config.toml.

use config::{Config, Environment, File};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::EnrichError;
use crate::stage::Stage;

const APP_NAME: &str = "contact-enrichment";

/// Remote AI provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSettings {
    /// Provider name ("openai", "anthropic", "mock")
    #[serde(default = "default_ai_provider")]
    pub provider: String,

    /// Chat model used for bios and theses
    #[serde(default = "default_ai_model")]
    pub model: String,

    /// Embedding model (OpenAI-compatible endpoint)
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    /// API key (usually loaded from env var, not stored in config file)
    #[serde(default)]
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    #[serde(default)]
    pub api_base_url: Option<String>,

    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_ai_max_retries")]
    pub max_retries: u32,
}

fn default_ai_provider() -> String {
    "openai".to_string()
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> usize {
    1536
}

fn default_ai_timeout_secs() -> u64 {
    30
}

fn default_ai_max_retries() -> u32 {
    3
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            provider: default_ai_provider(),
            model: default_ai_model(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            api_key: None,
            api_base_url: None,
            timeout_secs: default_ai_timeout_secs(),
            max_retries: default_ai_max_retries(),
        }
    }
}

/// Batching, pacing and failure thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Contacts fetched per stage runner call
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[serde(default = "default_enrichment_group_size")]
    pub enrichment_group_size: usize,

    #[serde(default = "default_extraction_group_size")]
    pub extraction_group_size: usize,

    #[serde(default = "default_embedding_group_size")]
    pub embedding_group_size: usize,

    #[serde(default = "default_enrichment_delay_ms")]
    pub enrichment_delay_ms: u64,

    #[serde(default = "default_extraction_delay_ms")]
    pub extraction_delay_ms: u64,

    #[serde(default = "default_embedding_delay_ms")]
    pub embedding_delay_ms: u64,

    /// Contacts per batch in a client-driven run
    #[serde(default = "default_client_batch_size")]
    pub client_batch_size: usize,

    /// Delay between batches in a client-driven run
    #[serde(default = "default_client_delay_ms")]
    pub client_delay_ms: u64,

    /// Page size of the initial eligibility scan
    #[serde(default = "default_scan_chunk")]
    pub scan_chunk: usize,

    /// Wall-clock budget of one scheduled invocation
    #[serde(default = "default_invocation_budget_secs")]
    pub invocation_budget_secs: u64,

    /// Consecutive fetch errors before an owner is marked failed
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    #[serde(default = "default_embedding_max_chars")]
    pub embedding_max_chars: usize,

    /// Shortest profile text worth embedding
    #[serde(default = "default_min_profile_chars")]
    pub min_profile_chars: usize,

    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

fn default_page_size() -> usize {
    20
}

fn default_enrichment_group_size() -> usize {
    Stage::Enrichment.default_group_size()
}

fn default_extraction_group_size() -> usize {
    Stage::Extraction.default_group_size()
}

fn default_embedding_group_size() -> usize {
    Stage::Embedding.default_group_size()
}

fn default_enrichment_delay_ms() -> u64 {
    Stage::Enrichment.default_delay_ms()
}

fn default_extraction_delay_ms() -> u64 {
    Stage::Extraction.default_delay_ms()
}

fn default_embedding_delay_ms() -> u64 {
    Stage::Embedding.default_delay_ms()
}

fn default_client_batch_size() -> usize {
    3
}

fn default_client_delay_ms() -> u64 {
    2000
}

fn default_scan_chunk() -> usize {
    1000
}

fn default_invocation_budget_secs() -> u64 {
    50
}

fn default_max_consecutive_errors() -> u32 {
    5
}

fn default_embedding_max_chars() -> usize {
    8000
}

fn default_min_profile_chars() -> usize {
    20
}

fn default_lease_ttl_secs() -> u64 {
    120
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            enrichment_group_size: default_enrichment_group_size(),
            extraction_group_size: default_extraction_group_size(),
            embedding_group_size: default_embedding_group_size(),
            enrichment_delay_ms: default_enrichment_delay_ms(),
            extraction_delay_ms: default_extraction_delay_ms(),
            embedding_delay_ms: default_embedding_delay_ms(),
            client_batch_size: default_client_batch_size(),
            client_delay_ms: default_client_delay_ms(),
            scan_chunk: default_scan_chunk(),
            invocation_budget_secs: default_invocation_budget_secs(),
            max_consecutive_errors: default_max_consecutive_errors(),
            embedding_max_chars: default_embedding_max_chars(),
            min_profile_chars: default_min_profile_chars(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

impl PipelineSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        let sizes = [
            ("page_size", self.page_size),
            ("enrichment_group_size", self.enrichment_group_size),
            ("extraction_group_size", self.extraction_group_size),
            ("embedding_group_size", self.embedding_group_size),
            ("client_batch_size", self.client_batch_size),
            ("scan_chunk", self.scan_chunk),
            ("embedding_max_chars", self.embedding_max_chars),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(format!("{} must be > 0", name));
            }
        }
        if self.max_consecutive_errors == 0 {
            return Err("max_consecutive_errors must be > 0".to_string());
        }
        if self.invocation_budget_secs == 0 {
            return Err("invocation_budget_secs must be > 0".to_string());
        }
        Ok(())
    }
}

/// Schedule of the background pipeline job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    /// 6-field cron expression (sec min hour day month weekday)
    #[serde(default = "default_cron")]
    pub cron: String,

    /// IANA timezone name
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: u64,

    /// Job timeout, 0 disables it
    #[serde(default = "default_job_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_cron() -> String {
    "0 * * * * *".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_jitter_secs() -> u64 {
    5
}

fn default_job_timeout_secs() -> u64 {
    55
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            timezone: default_timezone(),
            jitter_secs: default_jitter_secs(),
            timeout_secs: default_job_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to RocksDB storage directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub ai: AiSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub scheduler: ScheduleSettings,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", APP_NAME)
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            ai: AiSettings::default(),
            pipeline: PipelineSettings::default(),
            scheduler: ScheduleSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/contact-enrichment/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (ENRICH_*, nested keys joined with `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, EnrichError> {
        let config_dir = ProjectDirs::from("", "", APP_NAME)
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| EnrichError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| EnrichError::Config(e.to_string()))?
            .set_default("ai.provider", default_ai_provider())
            .map_err(|e| EnrichError::Config(e.to_string()))?
            .set_default("ai.model", default_ai_model())
            .map_err(|e| EnrichError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: ENRICH_DB_PATH, ENRICH_AI__PROVIDER, ENRICH_PIPELINE__PAGE_SIZE
        builder = builder.add_source(
            Environment::with_prefix("ENRICH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| EnrichError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| EnrichError::Config(e.to_string()))?;

        settings.pipeline.validate().map_err(EnrichError::Config)?;
        Ok(settings)
    }

    /// Expand ~ in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            if let Some(dirs) = BaseDirs::new() {
                return dirs.home_dir().join(rest);
            }
        }
        PathBuf::from(&self.db_path)
    }

    /// Directory for the daemon PID file
    pub fn runtime_dir() -> PathBuf {
        ProjectDirs::from("", "", APP_NAME)
            .map(|p| p.cache_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
