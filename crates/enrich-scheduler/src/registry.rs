//! Status registry for scheduled jobs.
//!
//! Records last run time, duration, result and counters per job so the
//! daemon can report scheduler health. Pause flags live here too: a paused
//! job still ticks but returns before doing any work.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobResult {
    Success,
    Failed(String),
    /// Tick skipped, e.g. because the previous run was still active
    Skipped(String),
}

/// Key/value stats a job reports back, e.g. owners stepped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutput {
    pub metadata: HashMap<String, String>,
}

impl JobOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_name: String,
    pub cron_expr: String,
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_result: Option<JobResult>,
    pub run_count: u64,
    pub error_count: u64,
    pub is_running: bool,
    pub is_paused: bool,
    #[serde(default)]
    pub last_run_metadata: HashMap<String, String>,
}

impl JobStatus {
    pub fn new(job_name: impl Into<String>, cron_expr: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            cron_expr: cron_expr.into(),
            last_run: None,
            last_duration_ms: None,
            last_result: None,
            run_count: 0,
            error_count: 0,
            is_running: false,
            is_paused: false,
            last_run_metadata: HashMap::new(),
        }
    }
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobStatus>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Status is plain bookkeeping; a panic while holding the lock leaves it
    // usable.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, JobStatus>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, JobStatus>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, job_name: &str, f: impl FnOnce(&mut JobStatus)) {
        if let Some(status) = self.write().get_mut(job_name) {
            f(status);
        }
    }

    /// Register a job, replacing any previous entry with the same name.
    pub fn register(&self, job_name: &str, cron_expr: &str) {
        self.write()
            .insert(job_name.to_string(), JobStatus::new(job_name, cron_expr));
    }

    pub fn record_start(&self, job_name: &str) {
        self.update(job_name, |s| s.is_running = true);
    }

    pub fn record_complete(&self, job_name: &str, result: JobResult, duration_ms: u64) {
        self.record_complete_with_output(job_name, result, duration_ms, JobOutput::new());
    }

    pub fn record_complete_with_output(&self, job_name: &str, result: JobResult, duration_ms: u64, output: JobOutput) {
        self.update(job_name, |s| {
            s.is_running = false;
            s.last_run = Some(Utc::now());
            s.last_duration_ms = Some(duration_ms);
            s.run_count += 1;
            if matches!(result, JobResult::Failed(_)) {
                s.error_count += 1;
            }
            s.last_result = Some(result);
            s.last_run_metadata = output.metadata;
        });
    }

    pub fn set_paused(&self, job_name: &str, paused: bool) {
        self.update(job_name, |s| s.is_paused = paused);
    }

    pub fn get_status(&self, job_name: &str) -> Option<JobStatus> {
        self.read().get(job_name).cloned()
    }

    /// All jobs, sorted by name.
    pub fn get_all_status(&self) -> Vec<JobStatus> {
        let mut all: Vec<JobStatus> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        all
    }

    pub fn is_running(&self, job_name: &str) -> bool {
        self.read().get(job_name).is_some_and(|s| s.is_running)
    }

    pub fn any_running(&self) -> bool {
        self.read().values().any(|s| s.is_running)
    }

    pub fn is_registered(&self, job_name: &str) -> bool {
        self.read().contains_key(job_name)
    }

    pub fn is_paused(&self, job_name: &str) -> bool {
        self.read().get(job_name).is_some_and(|s| s.is_paused)
    }

    pub fn job_count(&self) -> usize {
        self.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lifecycle() {
        let registry = JobRegistry::new();
        registry.register("pipeline_step", "0 * * * * *");
        assert!(registry.is_registered("pipeline_step"));

        registry.record_start("pipeline_step");
        assert!(registry.is_running("pipeline_step"));
        assert!(registry.any_running());

        let output = JobOutput::new().with_metadata("owners", 3);
        registry.record_complete_with_output("pipeline_step", JobResult::Success, 1200, output);

        let status = registry.get_status("pipeline_step").unwrap();
        assert!(!status.is_running);
        assert_eq!(status.run_count, 1);
        assert_eq!(status.error_count, 0);
        assert_eq!(status.last_duration_ms, Some(1200));
        assert_eq!(status.last_run_metadata.get("owners").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_failures_and_skips_counted_differently() {
        let registry = JobRegistry::new();
        registry.register("job", "0 * * * * *");

        registry.record_complete("job", JobResult::Failed("timeout".into()), 55_000);
        registry.record_complete("job", JobResult::Skipped("overlap".into()), 0);

        let status = registry.get_status("job").unwrap();
        assert_eq!(status.run_count, 2);
        assert_eq!(status.error_count, 1);
        assert_eq!(status.last_result, Some(JobResult::Skipped("overlap".into())));
    }

    #[test]
    fn test_pause_flag() {
        let registry = JobRegistry::new();
        registry.register("job", "0 * * * * *");
        registry.set_paused("job", true);
        assert!(registry.is_paused("job"));
        registry.set_paused("job", false);
        assert!(!registry.is_paused("job"));
    }

    #[test]
    fn test_unknown_job_is_ignored() {
        let registry = JobRegistry::new();
        registry.record_start("ghost");
        registry.record_complete("ghost", JobResult::Success, 1);
        registry.set_paused("ghost", true);

        assert!(registry.get_status("ghost").is_none());
        assert!(!registry.is_paused("ghost"));
        assert_eq!(registry.job_count(), 0);
    }

    #[test]
    fn test_all_status_sorted() {
        let registry = JobRegistry::new();
        registry.register("b", "0 * * * * *");
        registry.register("a", "0 * * * * *");
        let names: Vec<_> = registry.get_all_status().into_iter().map(|s| s.job_name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
