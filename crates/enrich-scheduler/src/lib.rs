//! Cron scheduler for the enrichment daemon.
//!
//! Wraps `tokio-cron-scheduler` with timezone-aware registration, a job
//! status registry, overlap prevention, jitter and per-run timeouts. The
//! `jobs` feature adds the scheduled pipeline invocation.
//!
//! # Example
//!
//! ```ignore
//! use enrich_scheduler::{JitterConfig, OverlapPolicy, SchedulerConfig, SchedulerService, TimeoutConfig};
//!
//! let scheduler = SchedulerService::new(SchedulerConfig::default()).await?;
//! scheduler.register_job(
//!     "pipeline_step",
//!     "0 * * * * *",
//!     None,
//!     OverlapPolicy::Skip,
//!     JitterConfig::new(5),
//!     TimeoutConfig::new(55),
//!     || async { Ok(JobOutput::new()) },
//! ).await?;
//! scheduler.start().await?;
//! ```

mod config;
mod error;
mod overlap;
mod registry;
mod scheduler;
mod timing;

#[cfg(feature = "jobs")]
pub mod jobs;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use overlap::{OverlapGuard, OverlapPolicy, RunGuard};
pub use registry::{JobOutput, JobRegistry, JobResult, JobStatus};
pub use scheduler::{validate_cron_expression, SchedulerService};
pub use timing::{with_jitter, JitterConfig, TimeoutConfig};
