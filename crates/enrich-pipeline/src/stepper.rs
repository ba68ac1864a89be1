//! Single-step driver for scheduled invocations.
//!
//! Each call to [`PipelineStepper::step_all`] advances every enrolled owner
//! by at most one stage runner call and persists the result on the owner's
//! pipeline record before returning. Calls are safe to repeat on a timer:
//! the keyset cursor and phase on the record say exactly where to continue.
//!
//! Only one page of contacts is ever held in memory. A shared wall-clock
//! budget stops new groups from starting once it runs out.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use enrich_storage::{PipelineRecordStore, StorageError};
use enrich_types::{PipelinePhase, PipelineRecord, PipelineState, RunStatus, Stage};

use crate::error::PipelineError;
use crate::machine::{advance, PhaseEvent};
use crate::progress::{ProgressStore, RecordProgressStore};
use crate::runner::{BatchGate, BatchOutcome, GateDecision, HaltReason, StageResult, StageRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Owner is marked failed and waits for a reset
    Failed,
    /// Another process holds the owner's lease
    Leased,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A stage runner call ran and the owner still has a run in flight
    Progressed,
    /// Nothing left to do
    Idle,
    Skipped(SkipReason),
    /// A page fetch or checkpoint write failed
    Errored(String),
    /// The invocation budget ran out before or during this owner's step
    BudgetExhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub owner_id: String,
    pub outcome: StepOutcome,
    /// Phase after the step
    pub phase: PipelinePhase,
    pub result: Option<StageResult>,
}

impl StepReport {
    fn new(owner_id: &str, outcome: StepOutcome, phase: PipelinePhase) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            outcome,
            phase,
            result: None,
        }
    }
}

/// Folds every finished group into the checkpoint and enforces the deadline.
struct StepGate<'a> {
    deadline: Instant,
    progress: &'a RecordProgressStore,
    state: &'a mut PipelineState,
}

#[async_trait]
impl<'a> BatchGate for StepGate<'a> {
    async fn before_batch(&mut self, _stage: Stage) -> GateDecision {
        if Instant::now() >= self.deadline {
            GateDecision::Halt(HaltReason::BudgetExhausted)
        } else {
            GateDecision::Proceed
        }
    }

    async fn after_batch(&mut self, outcome: &BatchOutcome) -> Result<(), PipelineError> {
        self.state.counters_mut(outcome.stage).merge(&outcome.counters());
        if let Some(last) = outcome.last_id() {
            self.state.cursor = Some(last.to_string());
        }
        self.state.batches_completed += 1;
        self.state.touch();
        self.progress.save(Some(&*self.state)).await
    }

    async fn between_batches(&mut self, delay: std::time::Duration) -> GateDecision {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining <= delay {
            return GateDecision::Halt(HaltReason::BudgetExhausted);
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        GateDecision::Proceed
    }
}

pub struct PipelineStepper {
    runner: Arc<StageRunner>,
    records: Arc<dyn PipelineRecordStore>,
    holder_id: String,
}

impl PipelineStepper {
    pub fn new(runner: Arc<StageRunner>, records: Arc<dyn PipelineRecordStore>) -> Self {
        Self {
            runner,
            records,
            holder_id: format!("stepper-{}", ulid::Ulid::new()),
        }
    }

    /// Make an owner visible to scheduled invocations.
    pub async fn enroll_owner(&self, owner_id: &str) -> Result<PipelineRecord, PipelineError> {
        if let Some(record) = self.records.load_record(owner_id).await? {
            return Ok(record);
        }
        let record = PipelineRecord::new(owner_id);
        self.records.save_record(&record).await?;
        info!(owner_id = %owner_id, "Owner enrolled for scheduled runs");
        Ok(record)
    }

    /// Clear a failed owner and its in-flight progress.
    pub async fn reset_owner(&self, owner_id: &str) -> Result<PipelineRecord, PipelineError> {
        let mut record = self
            .records
            .load_record(owner_id)
            .await?
            .ok_or_else(|| PipelineError::NotEnrolled(owner_id.to_string()))?;
        let phase = advance(
            record.progress.as_ref().map(|s| s.phase).unwrap_or_default(),
            PhaseEvent::Reset,
        );
        record.reset();
        self.records.save_record(&record).await?;
        info!(owner_id = %owner_id, phase = %phase, "Owner pipeline reset");
        Ok(record)
    }

    pub async fn status(&self, owner_id: &str) -> Result<Option<PipelineRecord>, PipelineError> {
        Ok(self.records.load_record(owner_id).await?)
    }

    pub async fn list(&self) -> Result<Vec<PipelineRecord>, PipelineError> {
        Ok(self.records.list_records().await?)
    }

    /// One invocation over every enrolled owner, sharing one budget.
    pub async fn step_all(&self) -> Result<Vec<StepReport>, PipelineError> {
        let deadline = Instant::now() + self.runner.config().invocation_budget;
        let records = self.records.list_records().await?;
        let mut reports = Vec::with_capacity(records.len());

        for record in records {
            if Instant::now() >= deadline {
                let phase = record.progress.as_ref().map(|s| s.phase).unwrap_or_default();
                reports.push(StepReport::new(&record.owner_id, StepOutcome::BudgetExhausted, phase));
                continue;
            }
            match self.step_until(&record.owner_id, deadline).await {
                Ok(report) => reports.push(report),
                // One owner's failure never holds up the others
                Err(e) => reports.push(self.step_failed(&record.owner_id, e).await),
            }
        }

        let progressed = reports
            .iter()
            .filter(|r| r.outcome == StepOutcome::Progressed)
            .count();
        info!(owners = reports.len(), progressed, "Pipeline invocation finished");
        Ok(reports)
    }

    /// One invocation for a single owner.
    pub async fn step_owner(&self, owner_id: &str) -> Result<StepReport, PipelineError> {
        let deadline = Instant::now() + self.runner.config().invocation_budget;
        self.step_until(owner_id, deadline).await
    }

    async fn step_until(&self, owner_id: &str, deadline: Instant) -> Result<StepReport, PipelineError> {
        let record = self
            .records
            .load_record(owner_id)
            .await?
            .ok_or_else(|| PipelineError::NotEnrolled(owner_id.to_string()))?;

        if record.status == RunStatus::Failed {
            debug!(owner_id = %owner_id, "Skipping failed owner");
            return Ok(StepReport::new(
                owner_id,
                StepOutcome::Skipped(SkipReason::Failed),
                PipelinePhase::Failed,
            ));
        }

        let ttl = self.runner.config().lease_ttl_chrono();
        if !self.records.try_acquire_lease(owner_id, &self.holder_id, ttl).await? {
            debug!(owner_id = %owner_id, "Owner leased elsewhere, skipping");
            let phase = record.progress.as_ref().map(|s| s.phase).unwrap_or_default();
            return Ok(StepReport::new(owner_id, StepOutcome::Skipped(SkipReason::Leased), phase));
        }

        let result = self.step_locked(owner_id, deadline).await;

        if let Err(e) = self.records.release_lease(owner_id, &self.holder_id).await {
            warn!(owner_id = %owner_id, error = %e, "Failed to release lease");
        }
        result
    }

    async fn step_locked(&self, owner_id: &str, deadline: Instant) -> Result<StepReport, PipelineError> {
        // Reload after taking the lease so the saved record keeps it
        let mut record = self
            .records
            .load_record(owner_id)
            .await?
            .ok_or_else(|| PipelineError::NotEnrolled(owner_id.to_string()))?;

        let resumed = record
            .progress
            .take()
            .filter(|state| state.phase.is_active() && state.validate().is_ok());

        let mut state = match resumed {
            Some(state) => state,
            None => {
                let work_found = match self.runner.has_pending_work(owner_id).await {
                    Ok(found) => found,
                    Err(PipelineError::Storage(e)) => return self.fetch_failed(record, None, e).await,
                    Err(e) => return Err(e),
                };
                if advance(PipelinePhase::Idle, PhaseEvent::WorkCheck { work_found }) == PipelinePhase::Idle {
                    record.status = RunStatus::Idle;
                    record.record_success();
                    self.records.save_record(&record).await?;
                    return Ok(StepReport::new(owner_id, StepOutcome::Idle, PipelinePhase::Idle));
                }
                info!(owner_id = %owner_id, "Eligible contacts found, starting run");
                PipelineState::new(owner_id, PipelinePhase::Enrichment)
            }
        };
        record.status = RunStatus::Active;

        let Some(stage) = state.phase.stage() else {
            return Ok(StepReport::new(owner_id, StepOutcome::Idle, state.phase));
        };

        let progress = RecordProgressStore::new(self.records.clone(), owner_id);
        let page = {
            let mut gate = StepGate {
                deadline,
                progress: &progress,
                state: &mut state,
            };
            let cursor = gate.state.cursor.clone();
            self.runner.run_page(stage, owner_id, cursor, &mut gate).await
        };

        let result = match page {
            Ok(result) => result,
            Err(PipelineError::Storage(e)) => return self.fetch_failed(record, Some(state), e).await,
            Err(e) => return Err(e),
        };

        let event = if result.completed {
            let work_remaining = if stage == Stage::Embedding {
                match self.runner.has_pending_work(owner_id).await {
                    Ok(found) => found,
                    Err(PipelineError::Storage(e)) => return self.fetch_failed(record, Some(state), e).await,
                    Err(e) => return Err(e),
                }
            } else {
                false
            };
            PhaseEvent::StageCompleted {
                work_remaining,
                cycle_progressed: state.cycle_progressed(),
            }
        } else {
            PhaseEvent::StageIncomplete
        };

        let next = advance(state.phase, event);
        record.record_success();

        match next {
            PipelinePhase::Idle => {
                info!(
                    owner_id = %owner_id,
                    cycles = state.cycle + 1,
                    succeeded = state.total_succeeded(),
                    failed = state.total_failed(),
                    "Pipeline run finished, owner idle"
                );
                record.status = RunStatus::Idle;
                record.completed_runs += 1;
                record.progress = None;
            }
            PipelinePhase::Enrichment if state.phase == PipelinePhase::Embedding => {
                state.begin_cycle();
                info!(owner_id = %owner_id, cycle = state.cycle, "Starting another enrichment cycle");
                record.progress = Some(state.clone());
            }
            phase => {
                if phase != state.phase {
                    debug!(owner_id = %owner_id, from = %state.phase, to = %phase, "Phase advanced");
                    state.phase = phase;
                    state.cursor = None;
                }
                state.touch();
                record.progress = Some(state.clone());
            }
        }
        self.records.save_record(&record).await?;

        let outcome = if result.halted == Some(HaltReason::BudgetExhausted) {
            StepOutcome::BudgetExhausted
        } else if next == PipelinePhase::Idle {
            StepOutcome::Idle
        } else {
            StepOutcome::Progressed
        };

        Ok(StepReport {
            owner_id: owner_id.to_string(),
            outcome,
            phase: next,
            result: Some(result),
        })
    }

    /// Record an error that ended an owner's step outside the page fetch
    /// (record load, lease, final save) and report it.
    async fn step_failed(&self, owner_id: &str, err: PipelineError) -> StepReport {
        let message = err.to_string();
        let mut phase = PipelinePhase::Idle;

        match self.records.load_record(owner_id).await {
            Ok(Some(mut record)) => {
                let threshold = self.runner.config().max_consecutive_errors;
                phase = record.progress.as_ref().map(|s| s.phase).unwrap_or_default();
                if record.record_error(&message, threshold) {
                    phase = PipelinePhase::Failed;
                    error!(
                        owner_id = %owner_id,
                        errors = record.consecutive_errors,
                        error = %message,
                        "Owner marked failed after consecutive errors"
                    );
                } else {
                    warn!(owner_id = %owner_id, errors = record.consecutive_errors, error = %message, "Step failed");
                }
                if let Err(e) = self.records.save_record(&record).await {
                    warn!(owner_id = %owner_id, error = %e, "Failed to record step error");
                }
            }
            Ok(None) => warn!(owner_id = %owner_id, error = %message, "Step failed for unknown owner"),
            Err(e) => warn!(owner_id = %owner_id, error = %message, load_error = %e, "Step failed, record unreadable"),
        }

        StepReport::new(owner_id, StepOutcome::Errored(message), phase)
    }

    /// Count a failed fetch against the owner and mark it failed at the
    /// threshold.
    async fn fetch_failed(
        &self,
        mut record: PipelineRecord,
        state: Option<PipelineState>,
        err: StorageError,
    ) -> Result<StepReport, PipelineError> {
        let threshold = self.runner.config().max_consecutive_errors;
        let message = err.to_string();
        record.record_error(&message, threshold);

        let current = state.as_ref().map(|s| s.phase).unwrap_or_default();
        let phase = advance(
            current,
            PhaseEvent::FetchFailed {
                consecutive_errors: record.consecutive_errors,
                threshold,
            },
        );

        if record.status == RunStatus::Failed {
            error!(
                owner_id = %record.owner_id,
                errors = record.consecutive_errors,
                error = %message,
                "Owner marked failed after consecutive errors"
            );
        } else {
            warn!(
                owner_id = %record.owner_id,
                errors = record.consecutive_errors,
                error = %message,
                "Page fetch failed"
            );
        }

        let phase = if record.status == RunStatus::Failed {
            PipelinePhase::Failed
        } else {
            phase
        };
        record.progress = state;
        self.records.save_record(&record).await?;

        Ok(StepReport::new(&record.owner_id, StepOutcome::Errored(message), phase))
    }
}
