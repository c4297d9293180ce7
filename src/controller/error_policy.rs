//! # Error Policy
//!
//! Decides what happens after a failure:
//!
//! - reconcile failures are requeued with per-key backoff until the retry
//!   budget runs out, terminal failures are dropped at once
//! - watch failures trigger a relist after a capped exponential delay, except
//!   an expired resource version which relists immediately

use crate::constants::{
    DEFAULT_MAX_RETRIES, DEFAULT_RELIST_BACKOFF_MAX_MS, DEFAULT_RELIST_BACKOFF_START_MS,
};
use crate::controller::reconciler::ReconcilerError;
use crate::controller::source::SourceError;
use std::time::Duration;

/// Why a key was dropped without a successful reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Terminal,
    RetriesExhausted { attempts: u32 },
}

/// What to do with a key whose reconcile failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Requeue,
    Drop(DropReason),
}

/// Retry budget for failed reconciles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Rate-limited requeues allowed per key; `None` retries forever
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Some(DEFAULT_MAX_RETRIES),
        }
    }
}

impl RetryPolicy {
    pub fn unlimited() -> Self {
        Self { max_retries: None }
    }

    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries: Some(max_retries),
        }
    }

    /// Decide the fate of a key that has already been requeued `requeues` times
    pub fn decide(&self, error: &ReconcilerError, requeues: u32) -> RetryDecision {
        if error.is_terminal() {
            return RetryDecision::Drop(DropReason::Terminal);
        }
        match self.max_retries {
            Some(max) if requeues >= max => RetryDecision::Drop(DropReason::RetriesExhausted {
                attempts: requeues.saturating_add(1),
            }),
            _ => RetryDecision::Requeue,
        }
    }
}

/// Capped exponential delay between relists
#[derive(Debug, Clone)]
pub struct RelistBackoff {
    start: Duration,
    max: Duration,
    next: Duration,
}

impl Default for RelistBackoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_RELIST_BACKOFF_START_MS),
            Duration::from_millis(DEFAULT_RELIST_BACKOFF_MAX_MS),
        )
    }
}

impl RelistBackoff {
    pub fn new(start: Duration, max: Duration) -> Self {
        let start = start.min(max);
        Self {
            start,
            max,
            next: start,
        }
    }

    /// Delay before the next relist attempt, doubling each call up to `max`
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    /// Delay appropriate for a specific watch failure
    pub fn delay_for(&mut self, error: &SourceError) -> Duration {
        match error {
            SourceError::Expired(_) => Duration::ZERO,
            _ => self.next_delay(),
        }
    }

    pub fn reset(&mut self) {
        self.next = self.start;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_terminal_errors_drop_immediately() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(&ReconcilerError::terminal(anyhow!("invalid")), 0),
            RetryDecision::Drop(DropReason::Terminal)
        );
    }

    #[test]
    fn test_budget_exhaustion() {
        let policy = RetryPolicy::with_max_retries(3);
        let err = ReconcilerError::from(anyhow!("transient"));
        assert_eq!(policy.decide(&err, 0), RetryDecision::Requeue);
        assert_eq!(policy.decide(&err, 2), RetryDecision::Requeue);
        assert_eq!(
            policy.decide(&err, 3),
            RetryDecision::Drop(DropReason::RetriesExhausted { attempts: 4 })
        );
    }

    #[test]
    fn test_unlimited_never_drops_transient_errors() {
        let policy = RetryPolicy::unlimited();
        let err = ReconcilerError::Panicked("boom".to_string());
        assert_eq!(policy.decide(&err, u32::MAX), RetryDecision::Requeue);
    }

    #[test]
    fn test_relist_backoff_doubles_and_caps() {
        let mut backoff = RelistBackoff::new(Duration::from_millis(800), Duration::from_secs(3));
        assert_eq!(backoff.next_delay(), Duration::from_millis(800));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1600));
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(800));
    }

    #[test]
    fn test_expired_relists_immediately() {
        let mut backoff = RelistBackoff::default();
        let expired = SourceError::Expired("too old resource version".to_string());
        assert_eq!(backoff.delay_for(&expired), Duration::ZERO);
        let throttled = SourceError::Throttled("slow down".to_string());
        assert_eq!(
            backoff.delay_for(&throttled),
            Duration::from_millis(DEFAULT_RELIST_BACKOFF_START_MS)
        );
    }
}
