//! Shared test utilities
//!
//! Provides a scripted [`WatchSource`] so tests decide exactly what the
//! informer lists and watches, plus small helpers for building objects and
//! waiting on asynchronous conditions.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use reconcile_controller::controller::key::ResourceKey;
use reconcile_controller::controller::source::{
    ObjectListing, SourceError, WatchEvent, WatchFilter, WatchSource, WatchStream,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

pub type EventSender = mpsc::UnboundedSender<Result<WatchEvent<ConfigMap>, SourceError>>;

/// Build a namespaced ConfigMap carrying a resource version
pub fn config_map(namespace: &str, name: &str, resource_version: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some(resource_version.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn key(name: &str) -> ResourceKey {
    ResourceKey::namespaced("default", name)
}

/// Poll `condition` until it holds, panicking after `within`
pub async fn eventually(within: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + within;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {within:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

enum WatchScript {
    Stream(mpsc::UnboundedReceiver<Result<WatchEvent<ConfigMap>, SourceError>>),
    Fail(SourceError),
}

/// Watch source driven entirely by the test
///
/// List responses and watch sessions are consumed in the order they were
/// scripted. Once the script runs out, List and Watch hang forever, which
/// models an API server that simply has nothing new to say.
#[derive(Default)]
pub struct FakeWatchSource {
    lists: Mutex<VecDeque<Result<ObjectListing<ConfigMap>, SourceError>>>,
    watches: Mutex<VecDeque<WatchScript>>,
    list_gate: Mutex<Option<Arc<Notify>>>,
    list_calls: AtomicUsize,
    watch_versions: Mutex<Vec<String>>,
}

impl std::fmt::Debug for FakeWatchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeWatchSource")
            .field("list_calls", &self.list_calls)
            .finish_non_exhaustive()
    }
}

impl FakeWatchSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_list(&self, items: Vec<ConfigMap>, resource_version: &str) {
        self.lists.lock().unwrap().push_back(Ok(ObjectListing {
            items,
            resource_version: Some(resource_version.to_string()),
        }));
    }

    pub fn push_list_error(&self, error: SourceError) {
        self.lists.lock().unwrap().push_back(Err(error));
    }

    /// Script the next watch session, returning the sender that feeds it
    ///
    /// Dropping the sender ends the stream cleanly.
    pub fn push_watch(&self) -> EventSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watches
            .lock()
            .unwrap()
            .push_back(WatchScript::Stream(rx));
        tx
    }

    pub fn push_watch_error(&self, error: SourceError) {
        self.watches
            .lock()
            .unwrap()
            .push_back(WatchScript::Fail(error));
    }

    /// Make every List wait until the returned handle is notified once per call
    pub fn gate_lists(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.list_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Resource versions every watch was opened from, in order
    pub fn watch_versions(&self) -> Vec<String> {
        self.watch_versions.lock().unwrap().clone()
    }
}

#[async_trait]
impl WatchSource<ConfigMap> for FakeWatchSource {
    async fn list(&self, _filter: &WatchFilter) -> Result<ObjectListing<ConfigMap>, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.list_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let next = self.lists.lock().unwrap().pop_front();
        match next {
            Some(response) => response,
            None => std::future::pending().await,
        }
    }

    async fn watch(
        &self,
        _filter: &WatchFilter,
        resource_version: &str,
    ) -> Result<WatchStream<ConfigMap>, SourceError> {
        self.watch_versions
            .lock()
            .unwrap()
            .push(resource_version.to_string());
        let next = self.watches.lock().unwrap().pop_front();
        match next {
            Some(WatchScript::Stream(rx)) => Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            })
            .boxed()),
            Some(WatchScript::Fail(error)) => Err(error),
            None => Ok(futures::stream::pending().boxed()),
        }
    }
}

/// One observed reconcile call
#[derive(Debug, Clone)]
pub struct Call {
    pub key: ResourceKey,
    /// Resource version of the cached object, `None` if it was gone
    pub version: Option<String>,
    pub at: Instant,
}

/// Shared log of reconcile calls
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn record(&self, key: &ResourceKey, obj: Option<&ConfigMap>) {
        self.calls.lock().unwrap().push(Call {
            key: key.clone(),
            version: obj.and_then(|o| o.metadata.resource_version.clone()),
            at: Instant::now(),
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn count_for(&self, key: &ResourceKey) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| &c.key == key)
            .count()
    }
}
