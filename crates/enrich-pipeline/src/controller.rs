//! Run-to-completion driver.
//!
//! A [`PipelineController`] owns one owner's long-lived run. `start()` scans
//! every eligible contact up front, enrolls them in a checkpoint and then
//! works through them in fixed-size batches. Each batch goes through all
//! three stages before the checkpoint is written, so a restart resumes at
//! the first unprocessed contact.
//!
//! Progress is published on a `watch` channel after every persisted batch.
//! Observers never see a value that was not written to the checkpoint first.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use enrich_storage::PipelineRecordStore;
use enrich_types::{PipelineState, Stage, StageCounters};

use crate::config::PipelineConfig;
use crate::controls::RunControls;
use crate::error::PipelineError;
use crate::progress::ProgressStore;
use crate::runner::StageRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Stopped,
    /// The run ended on an error; the checkpoint is kept for `resume()`
    Failed,
}

impl fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControllerStatus::Idle => "idle",
            ControllerStatus::Running => "running",
            ControllerStatus::Paused => "paused",
            ControllerStatus::Completed => "completed",
            ControllerStatus::Stopped => "stopped",
            ControllerStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageProgress {
    pub processed: u64,
    pub total: usize,
    pub succeeded: u64,
    pub failed: u64,
}

impl StageProgress {
    fn from_counters(counters: &StageCounters, total: usize) -> Self {
        Self {
            processed: counters.processed,
            total,
            succeeded: counters.succeeded,
            failed: counters.failed,
        }
    }
}

/// Coarse-grained progress, published at batch boundaries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressSnapshot {
    pub owner_id: String,
    pub status: ControllerStatus,
    pub enrichment: StageProgress,
    pub thesis: StageProgress,
    pub embedding: StageProgress,
    /// Contacts processed out of enrolled
    pub processed: usize,
    pub total: usize,
    /// Batches completed so far
    pub batch_index: usize,
    pub total_batches: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Stopped,
}

/// Final counters of a run. A stopped run is reported the same way with a
/// "stopped early" qualifier.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub owner_id: String,
    pub outcome: RunOutcome,
    pub enrichment: StageCounters,
    pub thesis: StageCounters,
    pub embedding: StageCounters,
    pub processed: usize,
    pub total: usize,
    pub batches: usize,
}

impl RunSummary {
    fn from_state(state: &PipelineState, outcome: RunOutcome) -> Self {
        Self {
            owner_id: state.owner_id.clone(),
            outcome,
            enrichment: state.enrichment,
            thesis: state.thesis,
            embedding: state.embedding,
            processed: state.processed_ids.len(),
            total: state.total,
            batches: state.batches_completed,
        }
    }

    pub fn stopped_early(&self) -> bool {
        self.outcome == RunOutcome::Stopped
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed {}/{} contacts in {} batches: enrichment {} ok / {} failed, thesis {} ok / {} failed, embedding {} ok / {} failed",
            self.processed,
            self.total,
            self.batches,
            self.enrichment.succeeded,
            self.enrichment.failed,
            self.thesis.succeeded,
            self.thesis.failed,
            self.embedding.succeeded,
            self.embedding.failed,
        )?;
        if self.stopped_early() {
            write!(f, " (stopped early)")?;
        }
        Ok(())
    }
}

/// Clears the running flag on drop, including on panic or cancellation.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

pub struct PipelineController {
    owner_id: String,
    runner: Arc<StageRunner>,
    progress: Arc<dyn ProgressStore>,
    records: Option<Arc<dyn PipelineRecordStore>>,
    holder_id: String,
    controls: RunControls,
    running: AtomicBool,
    snapshot_tx: watch::Sender<ProgressSnapshot>,
}

impl PipelineController {
    pub fn new(owner_id: impl Into<String>, runner: Arc<StageRunner>, progress: Arc<dyn ProgressStore>) -> Self {
        let owner_id = owner_id.into();
        let (snapshot_tx, _rx) = watch::channel(ProgressSnapshot {
            owner_id: owner_id.clone(),
            ..Default::default()
        });
        Self {
            owner_id,
            runner,
            progress,
            records: None,
            holder_id: format!("controller-{}", ulid::Ulid::new()),
            controls: RunControls::new(),
            running: AtomicBool::new(false),
            snapshot_tx,
        }
    }

    /// Hold the owner's lease for the duration of a run so scheduled steps
    /// and other processes leave the owner alone.
    pub fn with_lease(mut self, records: Arc<dyn PipelineRecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn config(&self) -> &PipelineConfig {
        self.runner.config()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub async fn has_checkpoint(&self) -> Result<bool, PipelineError> {
        Ok(self.progress.load().await?.is_some())
    }

    /// Toggle pause. Returns true if the run is now paused.
    pub fn pause_resume(&self) -> bool {
        let paused = self.controls.toggle_pause();
        info!(owner_id = %self.owner_id, paused, "Pause toggled");
        paused
    }

    pub fn pause(&self) {
        self.controls.set_paused(true);
    }

    pub fn unpause(&self) {
        self.controls.set_paused(false);
    }

    /// Request a stop. The batch in flight finishes and is counted.
    pub fn stop(&self) {
        info!(owner_id = %self.owner_id, "Stop requested");
        self.controls.abort();
    }

    /// Start a fresh run. Any existing checkpoint is discarded.
    pub async fn start(&self) -> Result<RunSummary, PipelineError> {
        let _guard = self.begin()?;
        self.acquire_lease().await?;
        let result = self.start_locked().await;
        self.release_lease().await;
        result
    }

    async fn start_locked(&self) -> Result<RunSummary, PipelineError> {
        self.controls.reset();
        self.progress.save(None).await?;

        let ids = self.scan_eligible().await?;
        let state = PipelineState::enroll(&self.owner_id, ids);
        self.progress.save(Some(&state)).await?;
        info!(owner_id = %self.owner_id, enrolled = state.total, "Pipeline run started");

        self.drive(state).await
    }

    /// Continue the run recorded in the checkpoint.
    pub async fn resume(&self) -> Result<RunSummary, PipelineError> {
        let _guard = self.begin()?;
        let state = self
            .progress
            .load()
            .await?
            .ok_or_else(|| PipelineError::NoCheckpoint(self.owner_id.clone()))?;

        self.acquire_lease().await?;
        self.controls.reset();
        info!(
            owner_id = %self.owner_id,
            processed = state.processed_ids.len(),
            total = state.total,
            "Pipeline run resumed"
        );
        let result = self.drive(state).await;
        self.release_lease().await;
        result
    }

    fn begin(&self) -> Result<RunGuard<'_>, PipelineError> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| PipelineError::AlreadyRunning(self.owner_id.clone()))?;
        Ok(RunGuard { flag: &self.running })
    }

    async fn acquire_lease(&self) -> Result<(), PipelineError> {
        if let Some(records) = &self.records {
            let acquired = records
                .try_acquire_lease(&self.owner_id, &self.holder_id, self.config().lease_ttl_chrono())
                .await?;
            if !acquired {
                return Err(PipelineError::LeaseHeld(self.owner_id.clone()));
            }
        }
        Ok(())
    }

    async fn release_lease(&self) {
        if let Some(records) = &self.records {
            if let Err(e) = records.release_lease(&self.owner_id, &self.holder_id).await {
                warn!(owner_id = %self.owner_id, error = %e, "Failed to release lease");
            }
        }
    }

    /// Every contact eligible for any stage, in id order.
    async fn scan_eligible(&self) -> Result<Vec<String>, PipelineError> {
        let chunk = self.config().scan_chunk;
        let mut ids = BTreeSet::new();
        for stage in Stage::ALL {
            let mut after = None;
            loop {
                let page = self.runner.fetch_page(stage, &self.owner_id, after, chunk).await?;
                let full = page.len() == chunk;
                after = page.last().map(|c| c.id.clone());
                ids.extend(page.into_iter().map(|c| c.id));
                if !full {
                    break;
                }
            }
        }
        debug!(owner_id = %self.owner_id, eligible = ids.len(), "Eligibility scan finished");
        Ok(ids.into_iter().collect())
    }

    /// Run the batch loop. On error, observers are left with the last
    /// persisted state marked failed.
    async fn drive(&self, state: PipelineState) -> Result<RunSummary, PipelineError> {
        let mut persisted = state.clone();
        match self.drive_batches(state, &mut persisted).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                error!(
                    owner_id = %self.owner_id,
                    processed = persisted.processed_ids.len(),
                    error = %e,
                    "Pipeline run failed"
                );
                self.publish(&persisted, ControllerStatus::Failed);
                Err(e)
            }
        }
    }

    async fn drive_batches(
        &self,
        mut state: PipelineState,
        persisted: &mut PipelineState,
    ) -> Result<RunSummary, PipelineError> {
        self.publish(&state, ControllerStatus::Running);
        let batch_size = self.config().client_batch_size.max(1);

        let outcome = loop {
            let mut remaining = state.remaining_ids();
            if remaining.is_empty() {
                let added = state.enroll_more(self.scan_eligible().await?);
                if added == 0 {
                    break RunOutcome::Completed;
                }
                info!(owner_id = %self.owner_id, added, "Enrolled contacts that became eligible mid-run");
                self.progress.save(Some(&state)).await?;
                *persisted = state.clone();
                remaining = state.remaining_ids();
            }

            if self.controls.is_aborted() {
                break RunOutcome::Stopped;
            }
            if self.controls.is_paused() {
                self.publish(&state, ControllerStatus::Paused);
                info!(owner_id = %self.owner_id, "Pipeline paused");
                if !self.controls.wait_while_paused().await {
                    break RunOutcome::Stopped;
                }
                info!(owner_id = %self.owner_id, "Pipeline resumed");
                self.publish(&state, ControllerStatus::Running);
            }

            // Renew before every batch so a long run keeps its claim
            self.acquire_lease().await?;

            let batch: Vec<String> = remaining.into_iter().take(batch_size).collect();
            self.process_batch(&mut state, &batch).await?;
            self.progress.save(Some(&state)).await?;
            *persisted = state.clone();
            self.publish(&state, ControllerStatus::Running);

            if !state.is_exhausted() && !self.controls.sleep_unless_aborted(self.config().client_delay).await {
                break RunOutcome::Stopped;
            }
        };

        self.progress.save(None).await?;
        let status = match outcome {
            RunOutcome::Completed => ControllerStatus::Completed,
            RunOutcome::Stopped => ControllerStatus::Stopped,
        };
        self.publish(&state, status);

        let summary = RunSummary::from_state(&state, outcome);
        info!(owner_id = %self.owner_id, outcome = ?outcome, "{}", summary);
        Ok(summary)
    }

    /// Run one batch of ids through every stage, in order, and fold the
    /// outcomes into `state`.
    async fn process_batch(&self, state: &mut PipelineState, ids: &[String]) -> Result<(), PipelineError> {
        for stage in Stage::ALL {
            let contacts = self.runner.eligible_among(stage, &self.owner_id, ids).await?;
            if contacts.is_empty() {
                continue;
            }
            let outcome = self.runner.run_batch(stage, &contacts).await;
            state.counters_mut(stage).merge(&outcome.counters());
        }

        state.mark_processed(ids);
        state.batches_completed += 1;
        debug!(
            owner_id = %self.owner_id,
            batch = state.batches_completed,
            processed = state.processed_ids.len(),
            total = state.total,
            "Batch finished"
        );
        Ok(())
    }

    fn publish(&self, state: &PipelineState, status: ControllerStatus) {
        let batch_size = self.config().client_batch_size.max(1);
        let snapshot = ProgressSnapshot {
            owner_id: self.owner_id.clone(),
            status,
            enrichment: StageProgress::from_counters(&state.enrichment, state.total),
            thesis: StageProgress::from_counters(&state.thesis, state.total),
            embedding: StageProgress::from_counters(&state.embedding, state.total),
            processed: state.processed_ids.len(),
            total: state.total,
            batch_index: state.batches_completed,
            total_batches: state.total.div_ceil(batch_size),
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}
