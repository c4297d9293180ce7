//! # Informer
//!
//! Keeps the cache current with a List followed by a Watch, and hands every
//! change to the event demultiplexer after the cache has been updated.
//!
//! ## Recovery
//!
//! - Watch stream closed by the server: re-watch from the last seen version,
//!   after a delay if the session delivered nothing
//! - Resource version expired (410 Gone): relist immediately
//! - Any other watch or list failure: relist after a capped exponential delay
//! - More than `max_consecutive_failures` failed Lists in a row, or as many
//!   failed watch sessions without a single event: give up with
//!   [`Error::WatchFailed`]
//!
//! Objects that disappear between two Lists are reported as deletions with
//! `final_state_unknown` set, since the informer never saw their final state.

use crate::constants::DEFAULT_MAX_CONSECUTIVE_WATCH_FAILURES;
use crate::controller::cache::{Applied, Store, Writer};
use crate::controller::error_policy::RelistBackoff;
use crate::controller::events::{EventHandler, ResourceEvent};
use crate::controller::source::{ObjectListing, SourceError, WatchEvent, WatchFilter, WatchSource};
use crate::error::{Error, Result};
use crate::observability::metrics;
use futures::StreamExt;
use kube::Resource;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Informer tuning
#[derive(Debug, Clone)]
pub struct InformerConfig {
    pub filter: WatchFilter,
    pub relist_backoff: RelistBackoff,
    pub max_consecutive_failures: u32,
    /// Replay every cached object as an update this often; `None` disables it
    pub resync_period: Option<Duration>,
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            filter: WatchFilter::default(),
            relist_backoff: RelistBackoff::default(),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_WATCH_FAILURES,
            resync_period: None,
        }
    }
}

pub struct Informer<K> {
    source: Arc<dyn WatchSource<K>>,
    writer: Writer<K>,
    handler: EventHandler,
    config: InformerConfig,
}

impl<K> fmt::Debug for Informer<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Informer")
            .field("writer", &self.writer)
            .field("handler", &self.handler)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Why the current watch session ended
enum WatchEnd {
    Cancelled,
    Failed(SourceError),
}

async fn next_resync(resync: &mut Option<Interval>) {
    match resync {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl<K> Informer<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    pub fn new(
        source: Arc<dyn WatchSource<K>>,
        writer: Writer<K>,
        handler: EventHandler,
        config: InformerConfig,
    ) -> Self {
        Self {
            source,
            writer,
            handler,
            config,
        }
    }

    /// Read handle onto the cache this informer maintains
    pub fn store(&self) -> Store<K> {
        self.writer.as_reader()
    }

    /// List and watch until `cancel` fires
    ///
    /// # Errors
    ///
    /// Returns [`Error::WatchFailed`] once Lists, or watch sessions that never
    /// delivered an event, have failed more than `max_consecutive_failures`
    /// times in a row.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let filter = self.config.filter.clone();
        let mut backoff = self.config.relist_backoff.clone();
        let mut list_failures: u32 = 0;
        let mut watch_failures: u32 = 0;
        let mut resync = self.config.resync_period.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let listed = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                listed = self.source.list(&filter) => listed,
            };

            let listing = match listed {
                Ok(listing) => listing,
                Err(e) => {
                    list_failures = list_failures.saturating_add(1);
                    metrics::increment_watch_restarts(e.reason());
                    if list_failures > self.config.max_consecutive_failures {
                        error!(
                            attempts = list_failures,
                            error = %e,
                            "❌ Giving up after repeated list failures"
                        );
                        return Err(Error::WatchFailed {
                            attempts: list_failures,
                            source: e,
                        });
                    }
                    let delay = backoff.delay_for(&e);
                    warn!(
                        attempts = list_failures,
                        reason = e.reason(),
                        error = %e,
                        "List failed, retrying in {:?}",
                        delay
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };
            if list_failures > 0 {
                info!(attempts = list_failures, "List recovered");
            }
            list_failures = 0;

            let mut resource_version = self.ingest_listing(listing);

            match self
                .watch_until_failure(
                    &filter,
                    &mut resource_version,
                    &mut backoff,
                    &mut watch_failures,
                    &mut resync,
                    &cancel,
                )
                .await
            {
                WatchEnd::Cancelled => return Ok(()),
                WatchEnd::Failed(e) => {
                    metrics::increment_watch_restarts(e.reason());
                    watch_failures = watch_failures.saturating_add(1);
                    if watch_failures > self.config.max_consecutive_failures {
                        error!(
                            attempts = watch_failures,
                            error = %e,
                            "❌ Giving up after repeated watch failures"
                        );
                        return Err(Error::WatchFailed {
                            attempts: watch_failures,
                            source: e,
                        });
                    }
                    let delay = backoff.delay_for(&e);
                    match &e {
                        SourceError::Expired(_) => {
                            info!(error = %e, "Resource version expired, relisting");
                        }
                        _ => warn!(
                            attempts = watch_failures,
                            reason = e.reason(),
                            error = %e,
                            "Watch failed, relisting in {:?}",
                            delay
                        ),
                    }
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Run watch sessions from `resource_version` until one fails or `cancel` fires
    ///
    /// A stream that ends cleanly is re-opened from the last version seen. Any
    /// received event clears `watch_failures`.
    async fn watch_until_failure(
        &mut self,
        filter: &WatchFilter,
        resource_version: &mut String,
        backoff: &mut RelistBackoff,
        watch_failures: &mut u32,
        resync: &mut Option<Interval>,
        cancel: &CancellationToken,
    ) -> WatchEnd {
        loop {
            debug!(resource_version = %resource_version, "Starting watch");
            let opened = tokio::select! {
                biased;
                () = cancel.cancelled() => return WatchEnd::Cancelled,
                opened = self.source.watch(filter, resource_version) => opened,
            };
            let mut stream = match opened {
                Ok(stream) => stream,
                Err(e) => return WatchEnd::Failed(e),
            };

            let mut received = false;
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return WatchEnd::Cancelled,
                    () = next_resync(resync) => self.resync(),
                    event = stream.next() => match event {
                        Some(Ok(event)) => {
                            received = true;
                            backoff.reset();
                            *watch_failures = 0;
                            self.ingest_event(event, resource_version);
                        }
                        Some(Err(e)) => return WatchEnd::Failed(e),
                        None => break,
                    },
                }
            }

            if received {
                debug!("Watch stream ended, re-watching");
                continue;
            }
            let delay = backoff.next_delay();
            debug!("Watch stream ended without events, re-watching in {:?}", delay);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return WatchEnd::Cancelled,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Replace the cache with a full listing and dispatch the differences
    fn ingest_listing(&mut self, listing: ObjectListing<K>) -> String {
        let ObjectListing {
            items,
            resource_version,
        } = listing;
        let listed = items.len();
        let diff = self.writer.replace(items);
        if diff.skipped > 0 {
            warn!(skipped = diff.skipped, "Listed objects without a usable key were ignored");
        }

        for obj in diff.added {
            self.handler.handle(&ResourceEvent::Added(obj));
        }
        for (old, new) in diff.updated {
            self.handler.handle(&ResourceEvent::Updated { old, new });
        }
        for object in diff.removed {
            self.handler.handle(&ResourceEvent::Deleted {
                object,
                final_state_unknown: true,
            });
        }

        let store = self.writer.as_reader();
        metrics::set_cached_objects(store.len());
        if self.writer.mark_synced() {
            info!(objects = listed, "✅ Initial list ingested, cache synced");
        } else {
            debug!(objects = listed, "Relist ingested");
        }

        resource_version.unwrap_or_else(|| "0".to_string())
    }

    fn ingest_event(&mut self, event: WatchEvent<K>, resource_version: &mut String) {
        match event {
            WatchEvent::Added(obj) => {
                metrics::increment_watch_events("added");
                self.apply_object(obj, resource_version);
            }
            WatchEvent::Modified(obj) => {
                metrics::increment_watch_events("modified");
                self.apply_object(obj, resource_version);
            }
            WatchEvent::Deleted(obj) => {
                metrics::increment_watch_events("deleted");
                if let Some(version) = obj.meta().resource_version.clone() {
                    *resource_version = version;
                }
                match self.writer.delete(&obj) {
                    Ok(_) => self.handler.handle(&ResourceEvent::Deleted {
                        object: Arc::new(obj),
                        final_state_unknown: false,
                    }),
                    Err(e) => warn!(error = %e, "Ignoring deleted object without a usable key"),
                }
            }
            WatchEvent::Bookmark(version) => {
                metrics::increment_watch_events("bookmark");
                *resource_version = version;
            }
        }
        metrics::set_cached_objects(self.writer.as_reader().len());
    }

    /// Store an added or modified object; the previous version decides the event kind
    fn apply_object(&mut self, obj: K, resource_version: &mut String) {
        if let Some(version) = obj.meta().resource_version.clone() {
            *resource_version = version;
        }
        match self.writer.apply(obj) {
            Ok(Applied {
                new, old: Some(old), ..
            }) => self.handler.handle(&ResourceEvent::Updated { old, new }),
            Ok(Applied { new, old: None, .. }) => {
                self.handler.handle(&ResourceEvent::Added(new));
            }
            Err(e) => warn!(error = %e, "Ignoring watched object without a usable key"),
        }
    }

    /// Replay every cached object as an update
    fn resync(&self) {
        let objects = self.writer.as_reader().list();
        debug!(objects = objects.len(), "Resyncing cached objects");
        for obj in objects {
            self.handler.handle(&ResourceEvent::Updated {
                old: Arc::clone(&obj),
                new: obj,
            });
        }
    }
}
