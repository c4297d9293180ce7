//! # Work Queue
//!
//! Deduplicating, rate-limited queue of keys waiting to be reconciled.
//!
//! The queue tracks three sets:
//!
//! - `queue`: items ready to be handed to a worker, in FIFO order
//! - `dirty`: items that need processing (every queued item is dirty)
//! - `processing`: items currently held by a worker
//!
//! An item that is added while it is being processed is only marked dirty.
//! It goes back on the queue when the worker calls [`WorkQueue::done`], so no
//! two workers ever hold the same key at the same time.

use crate::controller::key::ResourceKey;
use crate::controller::rate_limiter::{default_controller_rate_limiter, RateLimiter};
use crate::observability::metrics;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Point-in-time view of the queue, for logs and probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    /// Items ready to be handed to a worker
    pub depth: usize,
    /// Items currently held by workers
    pub processing: usize,
    /// Items scheduled for a delayed re-add
    pub waiting: usize,
}

struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    added_at: HashMap<T, Instant>,
    started_at: HashMap<T, Instant>,
    shutting_down: bool,
}

struct Inner<T> {
    name: String,
    state: Mutex<State<T>>,
    notify: Notify,
    rate_limiter: Box<dyn RateLimiter<T>>,
    shutdown: CancellationToken,
    waiting: AtomicUsize,
}

/// Work queue shared by the event demultiplexer and the reconcile workers
///
/// Cloning is cheap and every clone refers to the same queue.
pub struct WorkQueue<T = ResourceKey> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.inner.name)
            .field("shutting_down", &self.inner.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Create a queue that uses `rate_limiter` for [`WorkQueue::add_rate_limited`]
    pub fn new(name: impl Into<String>, rate_limiter: impl RateLimiter<T> + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    added_at: HashMap::new(),
                    started_at: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                rate_limiter: Box::new(rate_limiter),
                shutdown: CancellationToken::new(),
                waiting: AtomicUsize::new(0),
            }),
        }
    }

    /// Create a queue with [`default_controller_rate_limiter`]
    pub fn with_default_rate_limiter(name: impl Into<String>) -> Self {
        Self::new(name, default_controller_rate_limiter())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `item` as needing processing
    ///
    /// Adding an item that is already queued is a no-op. Adding an item that
    /// a worker currently holds defers it until that worker calls
    /// [`WorkQueue::done`]. Adds after shutdown are ignored.
    pub fn add(&self, item: T) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }

        metrics::increment_queue_adds(&self.inner.name);
        state.dirty.insert(item.clone());
        state
            .added_at
            .entry(item.clone())
            .or_insert_with(Instant::now);
        if state.processing.contains(&item) {
            return;
        }

        state.queue.push_back(item);
        metrics::set_queue_depth(&self.inner.name, state.queue.len());
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Wait for the next item, or `None` once the queue has been shut down
    ///
    /// The returned item belongs to the caller until it is passed to
    /// [`WorkQueue::done`].
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking state so no wakeup is lost in between
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    let now = Instant::now();
                    if let Some(added) = state.added_at.remove(&item) {
                        metrics::observe_queue_latency(
                            &self.inner.name,
                            now.saturating_duration_since(added).as_secs_f64(),
                        );
                    }
                    state.started_at.insert(item.clone(), now);
                    state.processing.insert(item.clone());
                    state.dirty.remove(&item);
                    metrics::set_queue_depth(&self.inner.name, state.queue.len());
                    return Some(item);
                }
            }

            notified.await;
        }
    }

    /// Release `item` after processing, re-queueing it if it was added meanwhile
    pub fn done(&self, item: &T) {
        let mut state = self.lock();
        if !state.processing.remove(item) {
            return;
        }
        if let Some(started) = state.started_at.remove(item) {
            metrics::observe_work_duration(&self.inner.name, started.elapsed().as_secs_f64());
        }

        if state.dirty.contains(item) && !state.shutting_down {
            state.queue.push_back(item.clone());
            metrics::set_queue_depth(&self.inner.name, state.queue.len());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Add `item` once `delay` has elapsed
    ///
    /// The pending add is abandoned if the queue shuts down first. Must be
    /// called from within a Tokio runtime when `delay` is non-zero.
    pub fn add_after(&self, item: T, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(item);
            return;
        }

        self.inner.waiting.fetch_add(1, Ordering::Relaxed);
        let queue = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {
                    trace!(queue = %queue.inner.name, "delayed add abandoned on shutdown");
                }
                () = tokio::time::sleep(delay) => queue.add(item),
            }
            queue.inner.waiting.fetch_sub(1, Ordering::Relaxed);
        });
    }

    /// Re-add `item` after the delay chosen by the rate limiter
    ///
    /// Returns the delay that was applied.
    pub fn add_rate_limited(&self, item: T) -> Duration {
        let delay = self.inner.rate_limiter.when(&item);
        metrics::increment_queue_retries(&self.inner.name);
        self.add_after(item, delay);
        delay
    }

    /// Reset the failure history of `item`
    pub fn forget(&self, item: &T) {
        self.inner.rate_limiter.forget(item);
    }

    /// Number of rate-limited re-adds since `item` was last forgotten
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.inner.rate_limiter.num_requeues(item)
    }

    /// Number of items ready to be handed out
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            depth: state.queue.len(),
            processing: state.processing.len(),
            waiting: self.inner.waiting.load(Ordering::Relaxed),
        }
    }

    /// Stop handing out items
    ///
    /// Every pending and future [`WorkQueue::get`] returns `None`, delayed
    /// adds are cancelled and further adds are ignored. Items already held by
    /// workers may still be passed to [`WorkQueue::done`].
    pub fn shut_down(&self) {
        {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            debug!(
                queue = %self.inner.name,
                depth = state.queue.len(),
                processing = state.processing.len(),
                "Shutting down work queue"
            );
        }
        self.inner.shutdown.cancel();
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}
