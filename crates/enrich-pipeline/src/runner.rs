//! Stage runner.
//!
//! Fetches one keyset page of contacts eligible for a stage, splits it into
//! concurrency groups and fans each group out to the [`UnitProcessor`].
//! Every group is awaited in full before the next starts, with a fixed
//! delay in between. The caller decides, through a [`BatchGate`], whether
//! the next group may start at all.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use enrich_storage::ContactStore;
use enrich_types::{Contact, Page, Stage, StageCounters};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::processor::UnitProcessor;

/// Outcome of one concurrency group.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub stage: Stage,
    /// Contact ids in the order they were handed out
    pub attempted: Vec<String>,
    pub succeeded: Vec<String>,
    /// Failed contact ids with the error message
    pub failed: Vec<(String, String)>,
}

impl BatchOutcome {
    pub fn succeeded_count(&self) -> u64 {
        self.succeeded.len() as u64
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.len() as u64
    }

    pub fn last_id(&self) -> Option<&str> {
        self.attempted.last().map(String::as_str)
    }

    pub fn counters(&self) -> StageCounters {
        let mut counters = StageCounters::default();
        counters.add(self.succeeded_count(), self.failed_count());
        counters
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// Wall-clock budget of the invocation ran out
    BudgetExhausted,
    /// Stop requested
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Halt(HaltReason),
}

/// Hooks the driver plugs into a page run.
#[async_trait]
pub trait BatchGate: Send {
    /// Called before each group is started.
    async fn before_batch(&mut self, stage: Stage) -> GateDecision;

    /// Called after each group with its outcome. An error ends the page run.
    async fn after_batch(&mut self, outcome: &BatchOutcome) -> Result<(), PipelineError>;

    /// Pacing between groups.
    async fn between_batches(&mut self, delay: Duration) -> GateDecision {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        GateDecision::Proceed
    }
}

/// Result of one stage runner call.
#[derive(Debug, Clone, PartialEq)]
pub struct StageResult {
    pub stage: Stage,
    pub counters: StageCounters,
    /// The fetched page was short and fully processed: no eligible rows left
    pub completed: bool,
    /// Last contact id handled, to continue from on the next call
    pub cursor: Option<String>,
    pub halted: Option<HaltReason>,
    pub batches: usize,
    pub fetched: usize,
}

pub struct StageRunner {
    store: Arc<dyn ContactStore>,
    processor: Arc<UnitProcessor>,
    config: PipelineConfig,
}

impl StageRunner {
    pub fn new(store: Arc<dyn ContactStore>, processor: Arc<UnitProcessor>, config: PipelineConfig) -> Self {
        Self {
            store,
            processor,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ContactStore> {
        &self.store
    }

    /// One keyset page of contacts eligible for `stage`.
    pub async fn fetch_page(
        &self,
        stage: Stage,
        owner_id: &str,
        after: Option<String>,
        limit: usize,
    ) -> Result<Vec<Contact>, PipelineError> {
        let contacts = self
            .store
            .select_contacts(&stage.filter(owner_id), Page::after(after, limit))
            .await?;
        Ok(contacts)
    }

    /// Which of `ids` are currently eligible for `stage`, in id order.
    pub async fn eligible_among(
        &self,
        stage: Stage,
        owner_id: &str,
        ids: &[String],
    ) -> Result<Vec<Contact>, PipelineError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = stage.filter(owner_id).id_in(ids.to_vec());
        Ok(self.store.select_contacts(&filter, Page::first(ids.len())).await?)
    }

    /// Whether any stage has at least one eligible contact.
    pub async fn has_pending_work(&self, owner_id: &str) -> Result<bool, PipelineError> {
        for stage in Stage::ALL {
            if !self.fetch_page(stage, owner_id, None, 1).await?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Process one group concurrently and wait for every outcome.
    pub async fn run_batch(&self, stage: Stage, contacts: &[Contact]) -> BatchOutcome {
        let handles: Vec<_> = contacts
            .iter()
            .cloned()
            .map(|contact| {
                let store = self.store.clone();
                let processor = self.processor.clone();
                let id = contact.id.clone();
                let handle =
                    tokio::spawn(async move { processor.process(store.as_ref(), stage, &contact).await });
                (id, handle)
            })
            .collect();

        let mut outcome = BatchOutcome {
            stage,
            attempted: Vec::with_capacity(handles.len()),
            succeeded: Vec::new(),
            failed: Vec::new(),
        };

        for (id, handle) in handles {
            outcome.attempted.push(id.clone());
            match handle.await {
                Ok(Ok(())) => outcome.succeeded.push(id),
                Ok(Err(e)) => {
                    debug!(stage = %stage, contact_id = %id, error = %e, "Contact failed");
                    outcome.failed.push((id, e.to_string()));
                }
                Err(e) => {
                    warn!(stage = %stage, contact_id = %id, error = %e, "Contact task panicked");
                    outcome.failed.push((id, e.to_string()));
                }
            }
        }

        outcome
    }

    /// One stage runner call: fetch a page after `after` and process it
    /// group by group.
    pub async fn run_page(
        &self,
        stage: Stage,
        owner_id: &str,
        after: Option<String>,
        gate: &mut dyn BatchGate,
    ) -> Result<StageResult, PipelineError> {
        let page_size = self.config.page_size;
        let page = self.fetch_page(stage, owner_id, after.clone(), page_size).await?;

        let mut result = StageResult {
            stage,
            counters: StageCounters::default(),
            completed: false,
            cursor: after,
            halted: None,
            batches: 0,
            fetched: page.len(),
        };

        let group_size = self.config.group_size(stage);
        for (index, group) in page.chunks(group_size).enumerate() {
            if index > 0 {
                if let GateDecision::Halt(reason) = gate.between_batches(self.config.delay(stage)).await {
                    result.halted = Some(reason);
                    break;
                }
            }
            if let GateDecision::Halt(reason) = gate.before_batch(stage).await {
                result.halted = Some(reason);
                break;
            }

            let outcome = self.run_batch(stage, group).await;
            result.counters.merge(&outcome.counters());
            if let Some(last) = outcome.last_id() {
                result.cursor = Some(last.to_string());
            }
            result.batches += 1;
            gate.after_batch(&outcome).await?;
        }

        result.completed = result.halted.is_none() && page.len() < page_size;

        info!(
            owner_id = %owner_id,
            stage = %stage,
            fetched = result.fetched,
            succeeded = result.counters.succeeded,
            failed = result.counters.failed,
            completed = result.completed,
            halted = ?result.halted,
            "Stage runner call finished"
        );

        Ok(result)
    }
}
