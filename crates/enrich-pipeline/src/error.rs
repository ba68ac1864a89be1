//! Error types for the enrichment pipeline.

use enrich_storage::StorageError;
use thiserror::Error;

/// Errors that end a pipeline call.
///
/// Per-contact AI failures never show up here; they are counted in the
/// stage counters instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Storage operation failed (page fetch, update, checkpoint write)
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A run for this owner is already in progress in this process
    #[error("Pipeline already running for owner {0}")]
    AlreadyRunning(String),

    /// Resume requested but nothing to resume
    #[error("No checkpoint to resume for owner {0}")]
    NoCheckpoint(String),

    /// Another process holds the owner's lease
    #[error("Pipeline lease for owner {0} is held elsewhere")]
    LeaseHeld(String),

    /// Owner has no pipeline record
    #[error("Owner {0} is not enrolled")]
    NotEnrolled(String),

    /// Checkpoint load/save issues
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}
