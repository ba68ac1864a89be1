//! Jitter and timeout settings for scheduled runs.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Random delay before a run, so several daemons sharing one store do not
/// hit the AI providers in lockstep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct JitterConfig {
    /// Maximum jitter in seconds (0 = none)
    pub max_jitter_secs: u64,
}

impl JitterConfig {
    pub fn new(max_jitter_secs: u64) -> Self {
        Self { max_jitter_secs }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// A duration in `[0, max_jitter_secs)`.
    pub fn generate_jitter(&self) -> Duration {
        if self.max_jitter_secs == 0 {
            return Duration::ZERO;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..self.max_jitter_secs * 1000);
        Duration::from_millis(jitter_ms)
    }

    pub fn is_enabled(&self) -> bool {
        self.max_jitter_secs > 0
    }
}

/// Run `job` after a random delay of up to `max_jitter_secs`.
pub async fn with_jitter<F, T>(max_jitter_secs: u64, job: F) -> T
where
    F: Future<Output = T>,
{
    let jitter = JitterConfig::new(max_jitter_secs).generate_jitter();
    if !jitter.is_zero() {
        tracing::debug!(jitter_ms = jitter.as_millis(), "Applying jitter delay");
        tokio::time::sleep(jitter).await;
    }
    job.await
}

/// Upper bound on one run. A run that exceeds it is dropped and recorded as
/// failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TimeoutConfig {
    /// Timeout in seconds (0 = unbounded)
    pub timeout_secs: u64,
}

impl TimeoutConfig {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn duration(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_bounds() {
        assert_eq!(JitterConfig::none().generate_jitter(), Duration::ZERO);
        assert!(!JitterConfig::default().is_enabled());

        let config = JitterConfig::new(2);
        for _ in 0..200 {
            assert!(config.generate_jitter() < Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_jitter_returns_value() {
        assert_eq!(with_jitter(3, async { 7 }).await, 7);
        assert_eq!(with_jitter(0, async { "now" }).await, "now");
    }

    #[test]
    fn test_timeout_duration() {
        assert_eq!(TimeoutConfig::none().duration(), None);
        assert_eq!(TimeoutConfig::new(55).duration(), Some(Duration::from_secs(55)));
    }
}
