//! # Lifecycle Controller
//!
//! Orders startup and shutdown of the informer and the workers.
//!
//! ```text
//! Created -> Watching -> Syncing -> Ready -> Draining -> Stopped
//! ```
//!
//! - `Watching`: the informer task is running its first List
//! - `Syncing`: the first List response is being ingested
//! - `Ready`: the cache is synced and workers are processing keys
//! - `Draining`: cancellation or a fatal error was observed; the watch has
//!   stopped, the queue is shut down and in-flight reconciles are finishing
//!
//! The current phase is published on a watch channel so the readiness probe
//! can report `Ready` without touching the controller itself.

use crate::config::ControllerConfig;
use crate::controller::cache::{self, Store, SyncState, Writer};
use crate::controller::engine::ReconcileEngine;
use crate::controller::error_policy::RetryPolicy;
use crate::controller::events::EventHandler;
use crate::controller::informer::{Informer, InformerConfig};
use crate::controller::queue::WorkQueue;
use crate::controller::rate_limiter::rate_limiter_from;
use crate::controller::reconciler::Reconciler;
use crate::controller::source::{WatchFilter, WatchSource};
use crate::error::{Error, Result};
use crate::observability::metrics;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

/// Lifecycle phase, only ever moving forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Created,
    Watching,
    Syncing,
    Ready,
    Draining,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "Created",
            Self::Watching => "Watching",
            Self::Syncing => "Syncing",
            Self::Ready => "Ready",
            Self::Draining => "Draining",
            Self::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

/// How the wait for the initial sync ended
enum SyncOutcome {
    Synced,
    TimedOut,
    Cancelled,
    InformerExited(std::result::Result<Result<()>, JoinError>),
}

fn informer_result(joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(Error::InformerStopped(e.to_string())),
    }
}

pub struct Controller<K> {
    source: Arc<dyn WatchSource<K>>,
    reconciler: Arc<dyn Reconciler<K>>,
    queue: WorkQueue,
    store: Store<K>,
    writer: Mutex<Option<Writer<K>>>,
    phase: Arc<watch::Sender<Phase>>,
    workers: usize,
    sync_timeout: Duration,
    retry_policy: RetryPolicy,
    handler: EventHandler,
    informer_config: InformerConfig,
}

impl<K> fmt::Debug for Controller<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("phase", &*self.phase.borrow())
            .field("queue", &self.queue)
            .field("workers", &self.workers)
            .field("sync_timeout", &self.sync_timeout)
            .finish_non_exhaustive()
    }
}

impl<K> Controller<K>
where
    K: kube::Resource + Clone + Send + Sync + 'static,
{
    pub fn new(
        source: Arc<dyn WatchSource<K>>,
        reconciler: Arc<dyn Reconciler<K>>,
        config: &ControllerConfig,
        filter: WatchFilter,
    ) -> Self {
        let queue = WorkQueue::new(
            config.queue_name.clone(),
            rate_limiter_from(config.backoff_settings()),
        );
        let (store, writer) = cache::store();
        let (phase, _) = watch::channel(Phase::Created);
        Self {
            source,
            reconciler,
            handler: EventHandler::new(queue.clone(), config.delete_policy),
            queue,
            store,
            writer: Mutex::new(Some(writer)),
            phase: Arc::new(phase),
            workers: config.workers.max(1),
            sync_timeout: config.sync_timeout(),
            retry_policy: config.retry_policy(),
            informer_config: config.informer_config(filter),
        }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn store(&self) -> Store<K> {
        self.store.clone()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Receiver that observes every phase transition
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, next: Phase) {
        let advanced = self.phase.send_if_modified(|phase| {
            if next > *phase {
                *phase = next;
                true
            } else {
                false
            }
        });
        if advanced {
            info!(phase = %next, "Controller phase changed");
            metrics::set_controller_ready(next == Phase::Ready);
        }
    }

    /// Run until `cancel` fires or a fatal error occurs
    ///
    /// Workers only start once the initial List has been ingested. On return
    /// every task the controller spawned has finished and the phase is
    /// [`Phase::Stopped`].
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyStarted`] if called more than once
    /// - [`Error::SyncTimeout`] if the cache does not sync in time
    /// - [`Error::WatchFailed`] or [`Error::InformerStopped`] if the informer dies
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(Error::AlreadyStarted)?;

        let informer_cancel = cancel.child_token();
        let informer = Informer::new(
            Arc::clone(&self.source),
            writer,
            self.handler.clone(),
            self.informer_config.clone(),
        );
        self.set_phase(Phase::Watching);
        let mut informer_task = tokio::spawn(
            informer
                .run(informer_cancel.clone())
                .instrument(info_span!("informer", queue = %self.queue.name())),
        );

        let mut informer_joined = false;
        let mut workers = JoinSet::new();
        let result = match self.wait_for_sync(&cancel, &mut informer_task).await {
            SyncOutcome::Synced => {
                self.set_phase(Phase::Ready);
                self.spawn_workers(&mut workers);
                info!(workers = self.workers, "🚀 Workers started");

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => Ok(()),
                    joined = &mut informer_task => {
                        informer_joined = true;
                        let result = informer_result(joined);
                        if let Err(e) = &result {
                            error!(error = %e, "❌ Informer failed, stopping controller");
                        }
                        result
                    }
                }
            }
            SyncOutcome::TimedOut => {
                error!(
                    timeout = ?self.sync_timeout,
                    "❌ Cache did not sync in time, stopping controller"
                );
                Err(Error::SyncTimeout(self.sync_timeout))
            }
            SyncOutcome::Cancelled => Ok(()),
            SyncOutcome::InformerExited(joined) => {
                informer_joined = true;
                let result = informer_result(joined);
                if let Err(e) = &result {
                    error!(error = %e, "❌ Informer failed before the cache synced");
                }
                result
            }
        };

        let informer_task = (!informer_joined).then_some(informer_task);
        self.drain(informer_cancel, informer_task, workers).await;
        result
    }

    async fn wait_for_sync(
        &self,
        cancel: &CancellationToken,
        informer_task: &mut JoinHandle<Result<()>>,
    ) -> SyncOutcome {
        let synced = async {
            self.store.wait_for(SyncState::Populating).await;
            self.set_phase(Phase::Syncing);
            self.store.wait_for_sync().await;
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => SyncOutcome::Cancelled,
            joined = informer_task => SyncOutcome::InformerExited(joined),
            waited = tokio::time::timeout(self.sync_timeout, synced) => match waited {
                Ok(()) => SyncOutcome::Synced,
                Err(_) => SyncOutcome::TimedOut,
            },
        }
    }

    fn spawn_workers(&self, workers: &mut JoinSet<()>) {
        let engine = ReconcileEngine::new(
            self.queue.clone(),
            self.store.clone(),
            Arc::clone(&self.reconciler),
            self.retry_policy,
        );
        for worker in 0..self.workers {
            let engine = engine.clone();
            workers.spawn(
                async move { engine.run_worker(worker).await }
                    .instrument(info_span!("worker", worker)),
            );
        }
    }

    /// Stop the watch, shut the queue down and wait for every task to finish
    async fn drain(
        &self,
        informer_cancel: CancellationToken,
        informer_task: Option<JoinHandle<Result<()>>>,
        mut workers: JoinSet<()>,
    ) {
        self.set_phase(Phase::Draining);
        informer_cancel.cancel();
        self.queue.shut_down();

        let stats = self.queue.stats();
        info!(
            in_flight = stats.processing,
            abandoned = stats.depth,
            "Draining, waiting for in-flight reconciles"
        );

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
        if let Some(task) = informer_task {
            if let Err(e) = informer_result(task.await) {
                warn!(error = %e, "Informer reported an error while stopping");
            }
        }

        self.set_phase(Phase::Stopped);
        info!("Controller stopped gracefully");
    }
}
