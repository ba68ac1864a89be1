//! Runtime configuration of the pipeline.

use std::time::Duration;

use enrich_types::{PipelineSettings, Stage};

/// Configuration shared by the stage runner and both drivers.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Contacts fetched per stage runner call
    pub page_size: usize,
    /// Concurrency group size per stage (enrichment, extraction, embedding)
    pub group_sizes: [usize; 3],
    /// Pause between groups per stage
    pub delays: [Duration; 3],
    /// Contacts per batch in a client-driven run
    pub client_batch_size: usize,
    /// Pause between batches in a client-driven run
    pub client_delay: Duration,
    /// Page size of the eligibility scan at run start
    pub scan_chunk: usize,
    /// Wall-clock budget of one scheduled invocation
    pub invocation_budget: Duration,
    /// Consecutive fetch errors before an owner is marked failed
    pub max_consecutive_errors: u32,
    pub embedding_max_chars: usize,
    pub min_profile_chars: usize,
    pub lease_ttl: Duration,
}

fn stage_index(stage: Stage) -> usize {
    match stage {
        Stage::Enrichment => 0,
        Stage::Extraction => 1,
        Stage::Embedding => 2,
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&PipelineSettings::default())
    }
}

impl From<&PipelineSettings> for PipelineConfig {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            page_size: settings.page_size,
            group_sizes: [
                settings.enrichment_group_size,
                settings.extraction_group_size,
                settings.embedding_group_size,
            ],
            delays: [
                Duration::from_millis(settings.enrichment_delay_ms),
                Duration::from_millis(settings.extraction_delay_ms),
                Duration::from_millis(settings.embedding_delay_ms),
            ],
            client_batch_size: settings.client_batch_size,
            client_delay: Duration::from_millis(settings.client_delay_ms),
            scan_chunk: settings.scan_chunk,
            invocation_budget: Duration::from_secs(settings.invocation_budget_secs),
            max_consecutive_errors: settings.max_consecutive_errors,
            embedding_max_chars: settings.embedding_max_chars,
            min_profile_chars: settings.min_profile_chars,
            lease_ttl: Duration::from_secs(settings.lease_ttl_secs),
        }
    }
}

impl PipelineConfig {
    pub fn group_size(&self, stage: Stage) -> usize {
        self.group_sizes[stage_index(stage)].max(1)
    }

    pub fn delay(&self, stage: Stage) -> Duration {
        self.delays[stage_index(stage)]
    }

    /// Lease TTL as a chrono duration for record bookkeeping.
    pub fn lease_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lease_ttl).unwrap_or_else(|_| chrono::Duration::seconds(120))
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn with_group_size(mut self, stage: Stage, size: usize) -> Self {
        self.group_sizes[stage_index(stage)] = size.max(1);
        self
    }

    pub fn with_delay(mut self, stage: Stage, delay: Duration) -> Self {
        self.delays[stage_index(stage)] = delay;
        self
    }

    pub fn with_client_batch_size(mut self, size: usize) -> Self {
        self.client_batch_size = size.max(1);
        self
    }

    pub fn with_client_delay(mut self, delay: Duration) -> Self {
        self.client_delay = delay;
        self
    }

    /// Drop every inter-group and inter-batch delay.
    pub fn without_delays(mut self) -> Self {
        self.delays = [Duration::ZERO; 3];
        self.client_delay = Duration::ZERO;
        self
    }

    pub fn with_scan_chunk(mut self, size: usize) -> Self {
        self.scan_chunk = size.max(1);
        self
    }

    pub fn with_invocation_budget(mut self, budget: Duration) -> Self {
        self.invocation_budget = budget;
        self
    }

    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max.max(1);
        self
    }

    pub fn with_embedding_max_chars(mut self, max: usize) -> Self {
        self.embedding_max_chars = max;
        self
    }

    pub fn with_min_profile_chars(mut self, min: usize) -> Self {
        self.min_profile_chars = min;
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }
}
