//! Scheduler service wrapper around tokio-cron-scheduler.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono_tz::Tz;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::overlap::{OverlapGuard, OverlapPolicy};
use crate::registry::{JobOutput, JobRegistry, JobResult};
use crate::timing::{JitterConfig, TimeoutConfig};
use crate::{SchedulerConfig, SchedulerError};

/// Check a 6-field cron expression (sec min hour day-of-month month
/// day-of-week).
///
/// ```
/// use enrich_scheduler::validate_cron_expression;
///
/// assert!(validate_cron_expression("0 * * * * *").is_ok());
/// assert!(validate_cron_expression("every minute").is_err());
/// ```
pub fn validate_cron_expression(expr: &str) -> Result<(), SchedulerError> {
    Job::new_async(expr, |_uuid, _lock| Box::pin(async {}))
        .map(|_| ())
        .map_err(|e| SchedulerError::InvalidCron(format!("'{}': {}", expr, e)))
}

pub struct SchedulerService {
    scheduler: JobScheduler,
    config: SchedulerConfig,
    registry: Arc<JobRegistry>,
    shutdown_token: CancellationToken,
    is_running: AtomicBool,
}

impl SchedulerService {
    /// Create a stopped scheduler. Fails on an invalid default timezone.
    pub async fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.parse_timezone()?;
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            config,
            registry: Arc::new(JobRegistry::new()),
            shutdown_token: CancellationToken::new(),
            is_running: AtomicBool::new(false),
        })
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        self.scheduler.start().await?;
        info!(jobs = self.registry.job_count(), "Scheduler started");
        Ok(())
    }

    /// Stop ticking, cancel pending jitter delays and wait up to the
    /// configured timeout for running jobs to finish.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }

        info!("Initiating scheduler shutdown");
        self.shutdown_token.cancel();

        let deadline = Instant::now() + Duration::from_secs(self.config.shutdown_timeout_secs);
        while self.registry.any_running() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if self.registry.any_running() {
            warn!("Jobs still running at shutdown timeout");
        }

        if let Err(e) = self.scheduler.shutdown().await {
            warn!(error = %e, "Error during scheduler shutdown");
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Scheduler shutdown complete");
        Ok(())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    pub fn parse_timezone(tz_str: &str) -> Result<Tz, SchedulerError> {
        tz_str
            .parse()
            .map_err(|_| SchedulerError::InvalidTimezone(tz_str.to_string()))
    }

    /// Register a cron job with status tracking, overlap policy, jitter and
    /// timeout.
    ///
    /// Every tick: a paused job returns at once; with [`OverlapPolicy::Skip`]
    /// a tick that finds the previous run active is recorded as skipped;
    /// otherwise the job sleeps for its jitter, runs under the timeout and
    /// records its result.
    #[allow(clippy::too_many_arguments)]
    pub async fn register_job<F, Fut>(
        &self,
        name: &str,
        cron_expr: &str,
        timezone: Option<&str>,
        overlap: OverlapPolicy,
        jitter: JitterConfig,
        timeout: TimeoutConfig,
        job_fn: F,
    ) -> Result<uuid::Uuid, SchedulerError>
    where
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<JobOutput, String>> + Send + 'static,
    {
        let tz = match timezone {
            Some(tz_str) => Self::parse_timezone(tz_str)?,
            None => self.config.parse_timezone()?,
        };
        validate_cron_expression(cron_expr)?;

        self.registry.register(name, cron_expr);

        let job_name = name.to_string();
        let registry = self.registry.clone();
        let guard = Arc::new(OverlapGuard::new(overlap));
        let token = self.shutdown_token.clone();

        let job = Job::new_async_tz(cron_expr, tz, move |_uuid, _lock| {
            let name = job_name.clone();
            let registry = registry.clone();
            let guard = guard.clone();
            let token = token.clone();
            let jitter = jitter.clone();
            let timeout = timeout.clone();
            let job_fn = job_fn.clone();

            Box::pin(async move {
                if registry.is_paused(&name) {
                    debug!(job = %name, "Job paused, skipping tick");
                    return;
                }
                let Some(_run) = guard.try_acquire() else {
                    info!(job = %name, "Previous run still active, skipping tick");
                    registry.record_complete(&name, JobResult::Skipped("overlap".to_string()), 0);
                    return;
                };

                let delay = jitter.generate_jitter();
                if !delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => return,
                    }
                }

                registry.record_start(&name);
                let start = Instant::now();
                let result = match timeout.duration() {
                    Some(limit) => match tokio::time::timeout(limit, job_fn()).await {
                        Ok(result) => result,
                        Err(_) => Err(format!("timed out after {}s", limit.as_secs())),
                    },
                    None => job_fn().await,
                };
                let duration_ms = start.elapsed().as_millis() as u64;

                match result {
                    Ok(output) => {
                        info!(job = %name, duration_ms, "Job completed");
                        registry.record_complete_with_output(&name, JobResult::Success, duration_ms, output);
                    }
                    Err(e) => {
                        warn!(job = %name, duration_ms, error = %e, "Job failed");
                        registry.record_complete(&name, JobResult::Failed(e), duration_ms);
                    }
                }
            })
        })
        .map_err(|e| SchedulerError::InvalidCron(e.to_string()))?;

        let uuid = self.scheduler.add(job).await?;
        info!(job = %name, uuid = %uuid, cron = %cron_expr, timezone = %tz.name(), "Job registered");
        Ok(uuid)
    }

    pub fn pause_job(&self, name: &str) -> Result<(), SchedulerError> {
        if !self.registry.is_registered(name) {
            return Err(SchedulerError::JobNotFound(name.to_string()));
        }
        self.registry.set_paused(name, true);
        info!(job = %name, "Job paused");
        Ok(())
    }

    pub fn resume_job(&self, name: &str) -> Result<(), SchedulerError> {
        if !self.registry.is_registered(name) {
            return Err(SchedulerError::JobNotFound(name.to_string()));
        }
        self.registry.set_paused(name, false);
        info!(job = %name, "Job resumed");
        Ok(())
    }
}
