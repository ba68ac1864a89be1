//! Jobs the daemon registers with the scheduler.
//!
//! - **pipeline**: one scheduled pipeline invocation over every enrolled owner

pub mod pipeline;

pub use pipeline::{create_pipeline_job, summarize_reports, PipelineJobConfig, PIPELINE_JOB_NAME};
