//! # Reconcile Engine
//!
//! Worker loop that turns queued keys into reconcile calls.
//!
//! Each worker repeatedly:
//!
//! 1. takes a key from the [`WorkQueue`] (blocking until one is available)
//! 2. looks the key up in the cache
//! 3. runs the [`Reconciler`], catching panics
//! 4. forgets the key on success, or requeues it with backoff on failure
//!
//! Reconcile errors are logged and counted here and never escape a worker.

use crate::controller::cache::Store;
use crate::controller::error_policy::{DropReason, RetryDecision, RetryPolicy};
use crate::controller::key::ResourceKey;
use crate::controller::queue::WorkQueue;
use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::observability::metrics;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info_span, warn, Instrument};

/// What happened to a key handed to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Reconcile succeeded and the retry history was reset
    Reconciled,
    /// Reconcile failed and the key was scheduled again after the given delay
    Requeued(Duration),
    /// Reconcile failed and the key was given up on
    Dropped(DropReason),
}

pub struct ReconcileEngine<K> {
    queue: WorkQueue,
    store: Store<K>,
    reconciler: Arc<dyn Reconciler<K>>,
    retry_policy: RetryPolicy,
}

impl<K> Clone for ReconcileEngine<K> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            store: self.store.clone(),
            reconciler: Arc::clone(&self.reconciler),
            retry_policy: self.retry_policy,
        }
    }
}

impl<K> fmt::Debug for ReconcileEngine<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcileEngine")
            .field("queue", &self.queue)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

impl<K> ReconcileEngine<K>
where
    K: Send + Sync + 'static,
{
    pub fn new(
        queue: WorkQueue,
        store: Store<K>,
        reconciler: Arc<dyn Reconciler<K>>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            store,
            reconciler,
            retry_policy,
        }
    }

    /// Process a single key
    ///
    /// Returns `None` once the queue has shut down.
    pub async fn process_next_item(&self) -> Option<ProcessOutcome> {
        let key = self.queue.get().await?;
        Some(self.process(&key).await)
    }

    /// Process keys until the queue shuts down
    pub async fn run_worker(&self, worker: usize) {
        debug!(worker, queue = %self.queue.name(), "Worker started");
        while self.process_next_item().await.is_some() {}
        debug!(worker, queue = %self.queue.name(), "Worker stopped");
    }

    async fn process(&self, key: &ResourceKey) -> ProcessOutcome {
        let attempt = self.queue.num_requeues(key).saturating_add(1);
        let span = info_span!("reconcile", resource.key = %key, attempt);
        let obj = self.store.get(key);

        metrics::increment_reconciliations();
        let start = Instant::now();
        let result = AssertUnwindSafe(self.reconciler.reconcile(key, obj))
            .catch_unwind()
            .instrument(span.clone())
            .await
            .unwrap_or_else(|payload| Err(ReconcilerError::Panicked(panic_message(&*payload))));
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        let _guard = span.enter();
        match result {
            Ok(()) => {
                self.queue.forget(key);
                self.queue.done(key);
                debug!("Successfully reconciled {}", key);
                ProcessOutcome::Reconciled
            }
            Err(err) => self.handle_error(key, &err),
        }
    }

    fn handle_error(&self, key: &ResourceKey, err: &ReconcilerError) -> ProcessOutcome {
        metrics::increment_reconciliation_errors();
        if matches!(err, ReconcilerError::Panicked(_)) {
            metrics::increment_reconciliation_panics();
        }

        let decision = self.retry_policy.decide(err, self.queue.num_requeues(key));
        self.queue.done(key);

        match decision {
            RetryDecision::Requeue => {
                let delay = self.queue.add_rate_limited(key.clone());
                warn!(
                    error = %err,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Error syncing {}, requeueing",
                    key
                );
                ProcessOutcome::Requeued(delay)
            }
            RetryDecision::Drop(reason) => {
                self.queue.forget(key);
                metrics::increment_queue_drops(self.queue.name());
                match reason {
                    DropReason::Terminal => {
                        error!(error = %err, "Dropping {} after terminal error", key);
                    }
                    DropReason::RetriesExhausted { attempts } => {
                        error!(
                            error = %err,
                            attempts,
                            "Dropping {} out of the queue after {} attempts",
                            key,
                            attempts
                        );
                    }
                }
                ProcessOutcome::Dropped(reason)
            }
        }
    }
}
