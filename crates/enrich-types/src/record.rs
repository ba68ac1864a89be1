//! Per-owner pipeline record used by scheduled runs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state::PipelineState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// A run is in progress
    Active,
    /// Nothing left to do until new contacts show up
    #[default]
    Idle,
    /// Too many consecutive errors; skipped until reset
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Active => write!(f, "active"),
            RunStatus::Idle => write!(f, "idle"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Exclusive claim on an owner's pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(holder: impl Into<String>, ttl: Duration) -> Self {
        Self {
            holder: holder.into(),
            expires_at: Utc::now() + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub owner_id: String,

    #[serde(default)]
    pub status: RunStatus,

    #[serde(default)]
    pub consecutive_errors: u32,

    #[serde(default)]
    pub last_error: Option<String>,

    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,

    /// Number of runs that reached idle
    #[serde(default)]
    pub completed_runs: u64,

    #[serde(default)]
    pub lease: Option<Lease>,

    /// Progress of the run in flight
    #[serde(default)]
    pub progress: Option<PipelineState>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl PipelineRecord {
    pub fn new(owner_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            owner_id: owner_id.into(),
            status: RunStatus::Idle,
            consecutive_errors: 0,
            last_error: None,
            last_run_at: None,
            completed_runs: 0,
            lease: None,
            progress: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `holder` may take the lease at `now`.
    pub fn lease_available(&self, holder: &str, now: DateTime<Utc>) -> bool {
        match &self.lease {
            None => true,
            Some(lease) => lease.holder == holder || lease.is_expired(now),
        }
    }

    /// Record a failed step. Returns true when the threshold was reached and
    /// the record is now failed.
    pub fn record_error(&mut self, error: impl Into<String>, threshold: u32) -> bool {
        self.consecutive_errors += 1;
        self.last_error = Some(error.into());
        self.last_run_at = Some(Utc::now());
        if self.consecutive_errors >= threshold {
            self.status = RunStatus::Failed;
        }
        self.updated_at = Utc::now();
        self.status == RunStatus::Failed
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
        self.last_run_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// Clear a failed record so scheduled runs pick it up again.
    pub fn reset(&mut self) {
        self.status = RunStatus::Idle;
        self.consecutive_errors = 0;
        self.last_error = None;
        self.progress = None;
        self.updated_at = Utc::now();
    }

    /// Serialize record to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize record from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_availability() {
        let now = Utc::now();
        let mut record = PipelineRecord::new("o");
        assert!(record.lease_available("a", now));

        record.lease = Some(Lease::new("a", Duration::seconds(60)));
        assert!(record.lease_available("a", now));
        assert!(!record.lease_available("b", now));
        assert!(record.lease_available("b", now + Duration::seconds(61)));
    }

    #[test]
    fn test_error_threshold_marks_failed() {
        let mut record = PipelineRecord::new("o");
        for _ in 0..4 {
            assert!(!record.record_error("fetch failed", 5));
        }
        assert!(record.record_error("fetch failed", 5));
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.last_error.as_deref(), Some("fetch failed"));

        record.reset();
        assert_eq!(record.status, RunStatus::Idle);
        assert_eq!(record.consecutive_errors, 0);
    }

    #[test]
    fn test_success_resets_error_count() {
        let mut record = PipelineRecord::new("o");
        record.record_error("boom", 5);
        record.record_success();
        assert_eq!(record.consecutive_errors, 0);
        assert!(record.last_run_at.is_some());
    }
}
