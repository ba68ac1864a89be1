//! Scheduled pipeline invocation.
//!
//! Each tick calls [`PipelineStepper::step_all`], which advances every
//! enrolled owner by one stage runner call within the invocation budget.
//! The default cron fires every minute with a 55 second timeout, so a slow
//! invocation is cut off before the next tick and overlap is skipped.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use enrich_pipeline::{PipelineStepper, StepOutcome, StepReport};
use enrich_types::ScheduleSettings;

use crate::{JitterConfig, JobOutput, OverlapPolicy, SchedulerError, SchedulerService, TimeoutConfig};

pub const PIPELINE_JOB_NAME: &str = "pipeline_step";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineJobConfig {
    /// Cron expression (default: "0 * * * * *" = every minute)
    pub cron: String,
    pub timezone: String,
    pub jitter_secs: u64,
    pub timeout_secs: u64,
}

impl Default for PipelineJobConfig {
    fn default() -> Self {
        Self::from(&ScheduleSettings::default())
    }
}

impl From<&ScheduleSettings> for PipelineJobConfig {
    fn from(settings: &ScheduleSettings) -> Self {
        Self {
            cron: settings.cron.clone(),
            timezone: settings.timezone.clone(),
            jitter_secs: settings.jitter_secs,
            timeout_secs: settings.timeout_secs,
        }
    }
}

/// Per-outcome owner counts of one invocation.
pub fn summarize_reports(reports: &[StepReport]) -> JobOutput {
    let count = |f: fn(&StepOutcome) -> bool| reports.iter().filter(|r| f(&r.outcome)).count();
    let processed: u64 = reports
        .iter()
        .filter_map(|r| r.result.as_ref())
        .map(|r| r.counters.processed)
        .sum();

    JobOutput::new()
        .with_metadata("owners", reports.len())
        .with_metadata("progressed", count(|o| matches!(o, StepOutcome::Progressed)))
        .with_metadata("idle", count(|o| matches!(o, StepOutcome::Idle)))
        .with_metadata("skipped", count(|o| matches!(o, StepOutcome::Skipped(_))))
        .with_metadata("errored", count(|o| matches!(o, StepOutcome::Errored(_))))
        .with_metadata("budget_exhausted", count(|o| matches!(o, StepOutcome::BudgetExhausted)))
        .with_metadata("contacts_processed", processed)
}

/// Register the pipeline invocation job.
pub async fn create_pipeline_job(
    scheduler: &SchedulerService,
    stepper: Arc<PipelineStepper>,
    config: PipelineJobConfig,
) -> Result<uuid::Uuid, SchedulerError> {
    let uuid = scheduler
        .register_job(
            PIPELINE_JOB_NAME,
            &config.cron,
            Some(&config.timezone),
            OverlapPolicy::Skip,
            JitterConfig::new(config.jitter_secs),
            TimeoutConfig::new(config.timeout_secs),
            move || {
                let stepper = stepper.clone();
                async move {
                    let reports = stepper.step_all().await.map_err(|e| e.to_string())?;
                    Ok(summarize_reports(&reports))
                }
            },
        )
        .await?;

    info!(cron = %config.cron, "Registered pipeline job");
    Ok(uuid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SchedulerConfig;
    use enrich_ai::{MockBioGenerator, MockEmbedder, MockThesisExtractor};
    use enrich_pipeline::{PipelineConfig, StageRunner, UnitProcessor};
    use enrich_storage::Storage;
    use enrich_types::{Contact, PipelinePhase};
    use tempfile::TempDir;

    fn stepper(storage: Arc<Storage>) -> Arc<PipelineStepper> {
        let processor = Arc::new(UnitProcessor::new(
            Arc::new(MockBioGenerator::new()),
            Arc::new(MockThesisExtractor::new()),
            Arc::new(MockEmbedder::new(4)),
        ));
        let runner = Arc::new(StageRunner::new(
            storage.clone(),
            processor,
            PipelineConfig::default().without_delays(),
        ));
        Arc::new(PipelineStepper::new(runner, storage))
    }

    #[test]
    fn test_default_config() {
        let config = PipelineJobConfig::default();
        assert_eq!(config.cron, "0 * * * * *");
        assert_eq!(config.timezone, "UTC");
        assert_eq!(config.timeout_secs, 55);
    }

    #[tokio::test]
    async fn test_summary_counts_outcomes() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp.path()).unwrap());
        storage.put_contact(&Contact::new("o", "c-1", "Ada")).unwrap();

        let stepper = stepper(storage);
        stepper.enroll_owner("o").await.unwrap();
        stepper.enroll_owner("nobody").await.unwrap();

        let reports = stepper.step_all().await.unwrap();
        let owner = reports.iter().find(|r| r.owner_id == "o").unwrap();
        assert_eq!(owner.phase, PipelinePhase::Extraction);

        let output = summarize_reports(&reports);
        assert_eq!(output.metadata["owners"], "2");
        assert_eq!(output.metadata["progressed"], "1");
        assert_eq!(output.metadata["idle"], "1");
        assert_eq!(output.metadata["contacts_processed"], "1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_job_registered() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp.path()).unwrap());
        let scheduler = SchedulerService::new(SchedulerConfig::default()).await.unwrap();

        create_pipeline_job(&scheduler, stepper(storage), PipelineJobConfig::default())
            .await
            .unwrap();

        let status = scheduler.registry().get_status(PIPELINE_JOB_NAME).unwrap();
        assert_eq!(status.cron_expr, "0 * * * * *");
        assert_eq!(status.run_count, 0);
    }
}
