//! # Resource Cache
//!
//! In-memory store of the last observed version of every watched object.
//!
//! The cache is split into a cloneable read handle ([`Store`]) and a single
//! [`Writer`] owned by the informer. Only the writer can mutate the map or
//! advance the sync state, which keeps ingest single-writer while any number
//! of workers read snapshots concurrently.

use crate::controller::key::{KeyError, ResourceKey};
use kube::Resource;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

/// Progress of the initial List ingestion
///
/// Ordered so that the state only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncState {
    /// No List response has been received yet
    Pending,
    /// The first List response is being ingested
    Populating,
    /// The full initial listing is in the cache
    Synced,
}

struct Shared<K> {
    objects: RwLock<HashMap<ResourceKey, Arc<K>>>,
    sync: watch::Sender<SyncState>,
}

/// Create an empty cache, returning the read handle and its only writer
pub fn store<K>() -> (Store<K>, Writer<K>) {
    let (sync, _) = watch::channel(SyncState::Pending);
    let shared = Arc::new(Shared {
        objects: RwLock::new(HashMap::new()),
        sync,
    });
    (
        Store {
            shared: Arc::clone(&shared),
        },
        Writer { shared },
    )
}

/// Read handle onto the cache
pub struct Store<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for Store<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> fmt::Debug for Store<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("len", &self.len())
            .field("sync_state", &self.sync_state())
            .finish()
    }
}

impl<K> Store<K> {
    /// Snapshot of the object stored under `key`, `None` if it no longer exists
    pub fn get(&self, key: &ResourceKey) -> Option<Arc<K>> {
        self.shared
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Snapshot of every cached object, in no particular order
    pub fn list(&self) -> Vec<Arc<K>> {
        self.shared
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        self.shared
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shared
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sync_state(&self) -> SyncState {
        *self.shared.sync.borrow()
    }

    /// True once the initial List has been fully ingested
    pub fn has_synced(&self) -> bool {
        self.sync_state() == SyncState::Synced
    }

    /// Receiver that observes every sync state transition
    pub fn subscribe_sync(&self) -> watch::Receiver<SyncState> {
        self.shared.sync.subscribe()
    }

    /// Wait until the sync state reaches at least `target`
    pub async fn wait_for(&self, target: SyncState) {
        let mut rx = self.subscribe_sync();
        // The sender lives as long as `self`, so this never observes a closed channel
        let _ = rx.wait_for(|state| *state >= target).await;
    }

    /// Wait until the initial List has been fully ingested
    pub async fn wait_for_sync(&self) {
        self.wait_for(SyncState::Synced).await;
    }
}

/// Outcome of writing a single object into the cache
#[derive(Debug)]
pub struct Applied<K> {
    pub key: ResourceKey,
    pub new: Arc<K>,
    pub old: Option<Arc<K>>,
}

/// Difference between the cache before and after a full relist
#[derive(Debug)]
pub struct Replaced<K> {
    pub added: Vec<Arc<K>>,
    pub updated: Vec<(Arc<K>, Arc<K>)>,
    pub removed: Vec<Arc<K>>,
    /// Objects in the listing that had no usable key
    pub skipped: usize,
}

/// Sole mutator of the cache, owned by the informer
pub struct Writer<K> {
    shared: Arc<Shared<K>>,
}

impl<K> fmt::Debug for Writer<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("sync_state", &*self.shared.sync.borrow())
            .finish_non_exhaustive()
    }
}

impl<K: Resource> Writer<K> {
    /// Read handle onto the same cache
    pub fn as_reader(&self) -> Store<K> {
        Store {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Insert or replace an object, returning the previous version if there was one
    ///
    /// # Errors
    ///
    /// Returns a [`KeyError`] if no key can be derived for the object.
    pub fn apply(&mut self, obj: K) -> Result<Applied<K>, KeyError> {
        let key = ResourceKey::from_object(&obj)?;
        let new = Arc::new(obj);
        let old = self
            .shared
            .objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), Arc::clone(&new));
        Ok(Applied { key, new, old })
    }

    /// Remove the object identified by `obj`, returning the last cached version
    ///
    /// # Errors
    ///
    /// Returns a [`KeyError`] if no key can be derived for the object.
    pub fn delete(&mut self, obj: &K) -> Result<(ResourceKey, Option<Arc<K>>), KeyError> {
        let key = ResourceKey::from_object(obj)?;
        let old = self
            .shared
            .objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        Ok((key, old))
    }

    /// Swap the whole cache for a fresh listing and report what changed
    ///
    /// Also advances the sync state to [`SyncState::Populating`] if this is
    /// the first listing.
    pub fn replace(&mut self, items: Vec<K>) -> Replaced<K> {
        self.advance(SyncState::Populating);

        let mut fresh = HashMap::with_capacity(items.len());
        let mut skipped = 0;
        for obj in items {
            match ResourceKey::from_object(&obj) {
                Ok(key) => {
                    fresh.insert(key, Arc::new(obj));
                }
                Err(_) => skipped += 1,
            }
        }

        let mut objects = self
            .shared
            .objects
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let mut added = Vec::new();
        let mut updated = Vec::new();
        for (key, new) in &fresh {
            match objects.get(key) {
                Some(old) => updated.push((Arc::clone(old), Arc::clone(new))),
                None => added.push(Arc::clone(new)),
            }
        }
        let removed = objects
            .iter()
            .filter(|(key, _)| !fresh.contains_key(*key))
            .map(|(_, obj)| Arc::clone(obj))
            .collect();

        *objects = fresh;

        Replaced {
            added,
            updated,
            removed,
            skipped,
        }
    }

    /// Mark the initial listing as fully ingested
    ///
    /// Only the first call has an effect.
    pub fn mark_synced(&mut self) -> bool {
        self.advance(SyncState::Synced)
    }

    fn advance(&self, to: SyncState) -> bool {
        self.shared.sync.send_if_modified(|state| {
            if to > *state {
                *state = to;
                true
            } else {
                false
            }
        })
    }
}
