//! # Event Demultiplexer
//!
//! Turns cache change notifications into work queue insertions.
//!
//! Every notification is reduced to the key of the object it concerns; the
//! queue collapses repeated keys, so a burst of changes to one object leads to
//! a single reconcile of its latest state.

use crate::controller::key::ResourceKey;
use crate::controller::queue::WorkQueue;
use kube::Resource;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// A change to the cache, delivered after the cache has been updated
#[derive(Debug, Clone)]
pub enum ResourceEvent<K> {
    Added(Arc<K>),
    Updated {
        old: Arc<K>,
        new: Arc<K>,
    },
    Deleted {
        object: Arc<K>,
        /// The delete was inferred from a relist, so `object` may be stale
        final_state_unknown: bool,
    },
}

impl<K> ResourceEvent<K> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Updated { .. } => "updated",
            Self::Deleted { .. } => "deleted",
        }
    }
}

/// Whether deletions enqueue the deleted key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Reconcile the key once more so it can observe the absence
    #[default]
    Enqueue,
    /// Drop deletions on the floor
    Ignore,
}

impl FromStr for DeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "enqueue" => Ok(Self::Enqueue),
            "ignore" => Ok(Self::Ignore),
            other => Err(format!(
                "invalid delete policy {other:?}, expected \"enqueue\" or \"ignore\""
            )),
        }
    }
}

/// Routes [`ResourceEvent`]s into the work queue
#[derive(Debug, Clone)]
pub struct EventHandler {
    queue: WorkQueue<ResourceKey>,
    delete_policy: DeletePolicy,
}

impl EventHandler {
    pub fn new(queue: WorkQueue<ResourceKey>, delete_policy: DeletePolicy) -> Self {
        Self {
            queue,
            delete_policy,
        }
    }

    pub fn delete_policy(&self) -> DeletePolicy {
        self.delete_policy
    }

    pub fn handle<K: Resource>(&self, event: &ResourceEvent<K>) {
        let kind = event.kind();
        match event {
            ResourceEvent::Added(obj) => {
                self.enqueue(obj.as_ref(), kind);
            }
            ResourceEvent::Updated { old, new } => {
                let Some(key) = self.enqueue(new.as_ref(), kind) else {
                    return;
                };
                match ResourceKey::from_object(old.as_ref()) {
                    Ok(old_key) if old_key != key => {
                        warn!(
                            resource.key = %key,
                            resource.old_key = %old_key,
                            "Update changed the object key, reconciling both"
                        );
                        self.queue.add(old_key);
                    }
                    _ => {}
                }
            }
            ResourceEvent::Deleted {
                object,
                final_state_unknown,
            } => match self.delete_policy {
                DeletePolicy::Enqueue => {
                    if let Some(key) = self.enqueue(object.as_ref(), kind) {
                        debug!(resource.key = %key, final_state_unknown, "Queued deleted object");
                    }
                }
                DeletePolicy::Ignore => {
                    debug!(final_state_unknown, "Ignoring delete event");
                }
            },
        }
    }

    fn enqueue<K: Resource>(&self, obj: &K, kind: &str) -> Option<ResourceKey> {
        match ResourceKey::from_object(obj) {
            Ok(key) => {
                self.queue.add(key.clone());
                Some(key)
            }
            Err(e) => {
                warn!(event = kind, error = %e, "Dropping event for object without a usable key");
                None
            }
        }
    }
}
