//! Resumable pipeline checkpoint.
//!
//! A `PipelineState` is written after every batch. It carries enough to
//! resume a run after a restart without reprocessing contacts: the enrolled
//! id list, the ids already processed, per-stage counters and the keyset
//! cursor of the stage currently running.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::stage::{PipelinePhase, Stage};

/// Outcome counters for one stage.
///
/// `succeeded + failed == processed` holds after every update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounters {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl StageCounters {
    pub fn record_success(&mut self) {
        self.processed += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self) {
        self.processed += 1;
        self.failed += 1;
    }

    /// Add a batch worth of outcomes.
    pub fn add(&mut self, succeeded: u64, failed: u64) {
        self.succeeded += succeeded;
        self.failed += failed;
        self.processed += succeeded + failed;
    }

    pub fn merge(&mut self, other: &StageCounters) {
        self.add(other.succeeded, other.failed);
    }

    pub fn is_consistent(&self) -> bool {
        self.succeeded + self.failed == self.processed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub owner_id: String,

    pub phase: PipelinePhase,

    /// Contacts enrolled in this run, in processing order
    #[serde(default)]
    pub enrolled_ids: Vec<String>,

    /// Contacts already processed in this run
    #[serde(default)]
    pub processed_ids: Vec<String>,

    #[serde(default)]
    pub total: usize,

    #[serde(default)]
    pub enrichment: StageCounters,

    #[serde(default)]
    pub thesis: StageCounters,

    #[serde(default)]
    pub embedding: StageCounters,

    /// Linear offset into `enrolled_ids`
    #[serde(default)]
    pub current_index: usize,

    #[serde(default)]
    pub batches_completed: usize,

    /// Last contact id handled by the current stage (keyset cursor)
    #[serde(default)]
    pub cursor: Option<String>,

    #[serde(default)]
    pub cycle: u32,

    /// Total successes when the current cycle began
    #[serde(default)]
    pub cycle_baseline: u64,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl PipelineState {
    /// Empty state for an owner, positioned at the given phase.
    pub fn new(owner_id: impl Into<String>, phase: PipelinePhase) -> Self {
        let now = Utc::now();
        Self {
            owner_id: owner_id.into(),
            phase,
            enrolled_ids: Vec::new(),
            processed_ids: Vec::new(),
            total: 0,
            enrichment: StageCounters::default(),
            thesis: StageCounters::default(),
            embedding: StageCounters::default(),
            current_index: 0,
            batches_completed: 0,
            cursor: None,
            cycle: 0,
            cycle_baseline: 0,
            started_at: now,
            updated_at: now,
        }
    }

    /// Fresh run over an explicit list of contact ids.
    pub fn enroll(owner_id: impl Into<String>, ids: Vec<String>) -> Self {
        let mut state = Self::new(owner_id, PipelinePhase::Enrichment);
        state.enroll_more(ids);
        state
    }

    /// Append ids that are not already enrolled. Returns how many were added.
    pub fn enroll_more(&mut self, ids: Vec<String>) -> usize {
        let mut known: HashSet<String> = self.enrolled_ids.iter().cloned().collect();
        let before = self.enrolled_ids.len();
        for id in ids {
            if known.insert(id.clone()) {
                self.enrolled_ids.push(id);
            }
        }
        self.total = self.enrolled_ids.len();
        self.total - before
    }

    pub fn counters(&self, stage: Stage) -> &StageCounters {
        match stage {
            Stage::Enrichment => &self.enrichment,
            Stage::Extraction => &self.thesis,
            Stage::Embedding => &self.embedding,
        }
    }

    pub fn counters_mut(&mut self, stage: Stage) -> &mut StageCounters {
        match stage {
            Stage::Enrichment => &mut self.enrichment,
            Stage::Extraction => &mut self.thesis,
            Stage::Embedding => &mut self.embedding,
        }
    }

    /// Enrolled ids not yet processed, in enrollment order.
    pub fn remaining_ids(&self) -> Vec<String> {
        let processed: HashSet<&String> = self.processed_ids.iter().collect();
        self.enrolled_ids
            .iter()
            .filter(|id| !processed.contains(id))
            .cloned()
            .collect()
    }

    /// Mark ids as processed. Ids that are not enrolled or already processed
    /// are ignored. Returns how many were newly marked.
    pub fn mark_processed(&mut self, ids: &[String]) -> usize {
        let enrolled: HashSet<&String> = self.enrolled_ids.iter().collect();
        let mut processed: HashSet<String> = self.processed_ids.iter().cloned().collect();
        let mut added = 0;
        for id in ids {
            if enrolled.contains(id) && processed.insert(id.clone()) {
                self.processed_ids.push(id.clone());
                added += 1;
            }
        }
        self.current_index = self.processed_ids.len();
        self.touch();
        added
    }

    pub fn is_exhausted(&self) -> bool {
        self.processed_ids.len() >= self.enrolled_ids.len()
    }

    pub fn total_succeeded(&self) -> u64 {
        self.enrichment.succeeded + self.thesis.succeeded + self.embedding.succeeded
    }

    pub fn total_failed(&self) -> u64 {
        self.enrichment.failed + self.thesis.failed + self.embedding.failed
    }

    /// Whether anything succeeded since the current cycle began.
    pub fn cycle_progressed(&self) -> bool {
        self.total_succeeded() > self.cycle_baseline
    }

    /// Start the next enrichment cycle.
    pub fn begin_cycle(&mut self) {
        self.cycle += 1;
        self.cycle_baseline = self.total_succeeded();
        self.cursor = None;
        self.phase = PipelinePhase::Enrichment;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Check the structural invariants of a loaded checkpoint.
    pub fn validate(&self) -> Result<(), String> {
        let enrolled: HashSet<&String> = self.enrolled_ids.iter().collect();
        if enrolled.len() != self.enrolled_ids.len() {
            return Err("duplicate enrolled ids".to_string());
        }
        let mut seen = HashSet::new();
        for id in &self.processed_ids {
            if !enrolled.contains(id) {
                return Err(format!("processed id {} is not enrolled", id));
            }
            if !seen.insert(id) {
                return Err(format!("processed id {} appears twice", id));
            }
        }
        for stage in Stage::ALL {
            if !self.counters(stage).is_consistent() {
                return Err(format!("{} counters do not add up", stage));
            }
        }
        Ok(())
    }

    /// Serialize state to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize state from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
