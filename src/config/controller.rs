//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use super::{env_var_or_default, env_var_or_default_str};
use crate::controller::error_policy::{RelistBackoff, RetryPolicy};
use crate::controller::events::DeletePolicy;
use crate::controller::informer::InformerConfig;
use crate::controller::rate_limiter::BackoffSettings;
use crate::controller::source::WatchFilter;
use crate::error::{Error, Result};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Name of the work queue, used as the metrics label
    pub queue_name: String,
    /// Number of reconcile workers
    pub workers: usize,
    /// Per-key backoff base delay (milliseconds), doubled on every failure
    pub backoff_base_ms: u64,
    /// Per-key backoff ceiling (milliseconds)
    pub backoff_max_ms: u64,
    /// Overall requeue rate (tokens per second)
    pub bucket_qps: f64,
    /// Overall requeue burst
    pub bucket_burst: u32,
    /// Rate-limited requeues allowed before a key is dropped
    pub max_retries: u32,
    /// Bound on the wait for the initial List to be ingested (seconds)
    pub sync_timeout_secs: u64,
    /// First relist delay after a watch failure (milliseconds)
    pub relist_backoff_start_ms: u64,
    /// Relist delay ceiling (milliseconds)
    pub relist_backoff_max_ms: u64,
    /// Failed Lists in a row before the watch is declared dead
    pub max_consecutive_watch_failures: u32,
    /// Periodic replay of the cache (seconds); 0 disables it
    pub resync_period_secs: u64,
    /// Whether deletions enqueue the deleted key
    pub delete_policy: DeletePolicy,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            workers: DEFAULT_WORKERS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            bucket_qps: DEFAULT_BUCKET_QPS,
            bucket_burst: DEFAULT_BUCKET_BURST,
            max_retries: DEFAULT_MAX_RETRIES,
            sync_timeout_secs: DEFAULT_SYNC_TIMEOUT_SECS,
            relist_backoff_start_ms: DEFAULT_RELIST_BACKOFF_START_MS,
            relist_backoff_max_ms: DEFAULT_RELIST_BACKOFF_MAX_MS,
            max_consecutive_watch_failures: DEFAULT_MAX_CONSECUTIVE_WATCH_FAILURES,
            resync_period_secs: DEFAULT_RESYNC_PERIOD_SECS,
            delete_policy: DeletePolicy::default(),
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            queue_name: env_var_or_default_str("QUEUE_NAME", DEFAULT_QUEUE_NAME),
            workers: env_var_or_default("WORKERS", DEFAULT_WORKERS),
            backoff_base_ms: env_var_or_default("BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            bucket_qps: env_var_or_default("BUCKET_QPS", DEFAULT_BUCKET_QPS),
            bucket_burst: env_var_or_default("BUCKET_BURST", DEFAULT_BUCKET_BURST),
            max_retries: env_var_or_default("MAX_RETRIES", DEFAULT_MAX_RETRIES),
            sync_timeout_secs: env_var_or_default("SYNC_TIMEOUT_SECS", DEFAULT_SYNC_TIMEOUT_SECS),
            relist_backoff_start_ms: env_var_or_default(
                "RELIST_BACKOFF_START_MS",
                DEFAULT_RELIST_BACKOFF_START_MS,
            ),
            relist_backoff_max_ms: env_var_or_default(
                "RELIST_BACKOFF_MAX_MS",
                DEFAULT_RELIST_BACKOFF_MAX_MS,
            ),
            max_consecutive_watch_failures: env_var_or_default(
                "MAX_CONSECUTIVE_WATCH_FAILURES",
                DEFAULT_MAX_CONSECUTIVE_WATCH_FAILURES,
            ),
            resync_period_secs: env_var_or_default(
                "RESYNC_PERIOD_SECS",
                DEFAULT_RESYNC_PERIOD_SECS,
            ),
            delete_policy: env_var_or_default("DELETE_POLICY", DeletePolicy::default()),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
            log_format: env_var_or_default_str("LOG_FORMAT", "json"),
        }
    }

    /// Reject settings the controller cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("WORKERS must be at least 1".into()));
        }
        if !(self.bucket_qps.is_finite() && self.bucket_qps > 0.0) {
            return Err(Error::Config(format!(
                "BUCKET_QPS must be a positive number, got {}",
                self.bucket_qps
            )));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(Error::Config(format!(
                "BACKOFF_BASE_MS ({}) exceeds BACKOFF_MAX_MS ({})",
                self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        if self.relist_backoff_start_ms > self.relist_backoff_max_ms {
            return Err(Error::Config(format!(
                "RELIST_BACKOFF_START_MS ({}) exceeds RELIST_BACKOFF_MAX_MS ({})",
                self.relist_backoff_start_ms, self.relist_backoff_max_ms
            )));
        }
        if self.sync_timeout_secs == 0 {
            return Err(Error::Config("SYNC_TIMEOUT_SECS must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn resync_period(&self) -> Option<Duration> {
        (self.resync_period_secs > 0).then(|| Duration::from_secs(self.resync_period_secs))
    }

    pub fn backoff_settings(&self) -> BackoffSettings {
        BackoffSettings {
            base: Duration::from_millis(self.backoff_base_ms),
            max: Duration::from_millis(self.backoff_max_ms),
            qps: self.bucket_qps,
            burst: self.bucket_burst,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_retries(self.max_retries)
    }

    pub fn relist_backoff(&self) -> RelistBackoff {
        RelistBackoff::new(
            Duration::from_millis(self.relist_backoff_start_ms),
            Duration::from_millis(self.relist_backoff_max_ms),
        )
    }

    pub fn informer_config(&self, filter: WatchFilter) -> InformerConfig {
        InformerConfig {
            filter,
            relist_backoff: self.relist_backoff(),
            max_consecutive_failures: self.max_consecutive_watch_failures,
            resync_period: self.resync_period(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_controller_rate_limiter() {
        let config = ControllerConfig::default();
        let backoff = config.backoff_settings();
        assert_eq!(backoff.base, Duration::from_millis(5));
        assert_eq!(backoff.max, Duration::from_secs(1000));
        assert_eq!(backoff.burst, 100);
        assert_eq!(config.delete_policy, DeletePolicy::Enqueue);
        assert_eq!(config.retry_policy(), RetryPolicy::with_max_retries(5));
    }

    #[test]
    fn test_resync_disabled_by_default() {
        let mut config = ControllerConfig::default();
        assert_eq!(config.resync_period(), None);
        config.resync_period_secs = 30;
        assert_eq!(config.resync_period(), Some(Duration::from_secs(30)));
        assert_eq!(
            config.informer_config(WatchFilter::default()).resync_period,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_validate() {
        assert!(ControllerConfig::default().validate().is_ok());

        let no_workers = ControllerConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(no_workers.validate(), Err(Error::Config(_))));

        let inverted = ControllerConfig {
            backoff_base_ms: 2_000,
            backoff_max_ms: 1_000,
            ..Default::default()
        };
        assert!(matches!(inverted.validate(), Err(Error::Config(msg)) if msg.contains("BACKOFF_BASE_MS")));

        let stalled = ControllerConfig {
            bucket_qps: 0.0,
            ..Default::default()
        };
        assert!(stalled.validate().is_err());
    }

    #[test]
    fn test_sync_timeout() {
        let config = ControllerConfig {
            sync_timeout_secs: 3,
            ..Default::default()
        };
        assert_eq!(config.sync_timeout(), Duration::from_secs(3));
    }
}
