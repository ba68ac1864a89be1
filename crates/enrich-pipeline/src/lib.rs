//! Resumable, batched contact enrichment.
//!
//! Contacts flow through three AI stages: bio enrichment, thesis
//! extraction and embedding. Two drivers share the same building blocks:
//!
//! - [`PipelineController`]: one long-lived run per owner with
//!   pause/resume/stop controls and a progress feed
//! - [`PipelineStepper`]: short, time-boxed invocations (cron, serverless)
//!   that advance each owner's state machine by one stage runner call
//!
//! Building blocks:
//! - [`UnitProcessor`]: one AI call for one contact, failures stay local
//! - [`StageRunner`]: keyset-paged fetch, concurrency groups, pacing
//! - [`machine::advance`]: phase transitions
//! - [`ProgressStore`]: durable checkpoint, key/value slot or per-owner record
//! - [`RunControls`]: pause and abort signalling

pub mod config;
pub mod controller;
pub mod controls;
pub mod error;
pub mod machine;
pub mod processor;
pub mod progress;
pub mod runner;
pub mod stepper;

pub use config::PipelineConfig;
pub use controller::{ControllerStatus, PipelineController, ProgressSnapshot, RunOutcome, RunSummary, StageProgress};
pub use controls::{ControlState, RunControls};
pub use error::PipelineError;
pub use machine::{advance, PhaseEvent};
pub use processor::{UnitError, UnitProcessor, UnitUpdate};
pub use progress::{ProgressStore, RecordProgressStore, SlotProgressStore};
pub use runner::{BatchGate, BatchOutcome, GateDecision, HaltReason, StageResult, StageRunner};
pub use stepper::{PipelineStepper, SkipReason, StepOutcome, StepReport};
