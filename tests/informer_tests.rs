//! # Informer Tests
//!
//! Drive an [`Informer`] against a scripted watch source and check what ends
//! up in the cache and the work queue.

mod common;

use common::{config_map, eventually, key, FakeWatchSource};
use k8s_openapi::api::core::v1::ConfigMap;
use reconcile_controller::controller::cache::{self, Store};
use reconcile_controller::controller::error_policy::RelistBackoff;
use reconcile_controller::controller::events::{DeletePolicy, EventHandler};
use reconcile_controller::controller::informer::{Informer, InformerConfig};
use reconcile_controller::controller::key::ResourceKey;
use reconcile_controller::controller::queue::WorkQueue;
use reconcile_controller::controller::source::{SourceError, WatchEvent, WatchSource};
use reconcile_controller::Error;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    source: Arc<FakeWatchSource>,
    store: Store<ConfigMap>,
    queue: WorkQueue,
    cancel: CancellationToken,
    task: JoinHandle<reconcile_controller::Result<()>>,
}

fn test_config() -> InformerConfig {
    InformerConfig {
        relist_backoff: RelistBackoff::new(Duration::from_millis(10), Duration::from_millis(80)),
        max_consecutive_failures: 3,
        ..InformerConfig::default()
    }
}

fn start(source: Arc<FakeWatchSource>, config: InformerConfig) -> Harness {
    let (store, writer) = cache::store();
    let queue = WorkQueue::with_default_rate_limiter("informer-test");
    let handler = EventHandler::new(queue.clone(), DeletePolicy::Enqueue);
    let shared = Arc::clone(&source);
    let watch_source: Arc<dyn WatchSource<ConfigMap>> = shared;
    let informer = Informer::new(watch_source, writer, handler, config);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(informer.run(cancel.clone()));
    Harness {
        source,
        store,
        queue,
        cancel,
        task,
    }
}

/// Take everything currently queued, marking each key done
async fn drain_queue(queue: &WorkQueue) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    while !queue.is_empty() {
        let key = tokio::time::timeout(WAIT, queue.get())
            .await
            .expect("queued key should be delivered")
            .expect("queue should be running");
        queue.done(&key);
        keys.insert(key.to_string());
    }
    keys
}

fn names(keys: &[&str]) -> BTreeSet<String> {
    keys.iter().map(|k| format!("default/{k}")).collect()
}

#[tokio::test]
async fn test_initial_list_populates_cache_and_enqueues_every_key() {
    let source = FakeWatchSource::new();
    source.push_list(
        vec![
            config_map("default", "a", "1"),
            config_map("default", "b", "2"),
            config_map("default", "c", "3"),
        ],
        "10",
    );
    let h = start(source, test_config());

    tokio::time::timeout(WAIT, h.store.wait_for_sync())
        .await
        .expect("cache should sync");
    assert_eq!(h.store.len(), 3);
    assert_eq!(drain_queue(&h.queue).await, names(&["a", "b", "c"]));

    eventually(WAIT, || !h.source.watch_versions().is_empty()).await;
    assert_eq!(h.source.watch_versions(), vec!["10".to_string()]);

    h.cancel.cancel();
    assert!(h.task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_watch_events_update_cache_before_enqueueing() {
    let source = FakeWatchSource::new();
    source.push_list(vec![config_map("default", "a", "1")], "1");
    let events = source.push_watch();
    let h = start(source, test_config());
    tokio::time::timeout(WAIT, h.store.wait_for_sync()).await.unwrap();
    drain_queue(&h.queue).await;

    events
        .send(Ok(WatchEvent::Added(config_map("default", "b", "2"))))
        .unwrap();
    events
        .send(Ok(WatchEvent::Modified(config_map("default", "a", "3"))))
        .unwrap();
    eventually(WAIT, || h.queue.len() == 2).await;

    let b = h.store.get(&key("b")).expect("added object is cached");
    assert_eq!(b.metadata.resource_version.as_deref(), Some("2"));
    let a = h.store.get(&key("a")).expect("modified object is cached");
    assert_eq!(a.metadata.resource_version.as_deref(), Some("3"));
    assert_eq!(drain_queue(&h.queue).await, names(&["a", "b"]));

    events
        .send(Ok(WatchEvent::Deleted(config_map("default", "a", "4"))))
        .unwrap();
    eventually(WAIT, || h.queue.len() == 1).await;
    assert!(h.store.get(&key("a")).is_none());
    assert_eq!(drain_queue(&h.queue).await, names(&["a"]));

    h.cancel.cancel();
    h.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_closed_watch_resumes_from_latest_bookmark() {
    let source = FakeWatchSource::new();
    source.push_list(vec![], "5");
    let events = source.push_watch();
    let h = start(source, test_config());
    tokio::time::timeout(WAIT, h.store.wait_for_sync()).await.unwrap();

    events.send(Ok(WatchEvent::Bookmark("42".into()))).unwrap();
    drop(events);

    eventually(WAIT, || h.source.watch_versions().len() == 2).await;
    assert_eq!(h.source.watch_versions(), vec!["5".to_string(), "42".to_string()]);
    // A cleanly closed watch never triggers a relist
    assert_eq!(h.source.list_calls(), 1);

    h.cancel.cancel();
    h.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_expired_watch_relists_and_reports_vanished_objects() {
    let source = FakeWatchSource::new();
    source.push_list(
        vec![config_map("default", "a", "1"), config_map("default", "b", "1")],
        "1",
    );
    let first = source.push_watch();
    source.push_list(vec![config_map("default", "a", "7")], "7");
    let h = start(source, test_config());
    tokio::time::timeout(WAIT, h.store.wait_for_sync()).await.unwrap();
    drain_queue(&h.queue).await;

    first
        .send(Err(SourceError::Expired("too old resource version".into())))
        .unwrap();

    eventually(WAIT, || h.source.list_calls() == 2 && h.store.len() == 1).await;
    assert!(h.store.get(&key("b")).is_none());
    let a = h.store.get(&key("a")).unwrap();
    assert_eq!(a.metadata.resource_version.as_deref(), Some("7"));
    // b vanished between Lists, a was refreshed
    assert_eq!(drain_queue(&h.queue).await, names(&["a", "b"]));

    eventually(WAIT, || h.source.watch_versions().len() == 2).await;
    assert_eq!(h.source.watch_versions()[1], "7");

    h.cancel.cancel();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_watch_open_failure_relists_after_backoff() {
    let source = FakeWatchSource::new();
    source.push_list(vec![config_map("default", "a", "1")], "1");
    source.push_watch_error(SourceError::Throttled("slow down".into()));
    source.push_list(vec![config_map("default", "a", "1")], "2");
    let h = start(source, test_config());

    eventually(WAIT, || h.source.list_calls() == 2).await;
    eventually(WAIT, || h.source.watch_versions().len() == 2).await;
    assert_eq!(h.source.watch_versions(), vec!["1".to_string(), "2".to_string()]);
    assert_eq!(h.store.len(), 1);

    h.cancel.cancel();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_watch_that_never_opens_is_fatal() {
    let source = FakeWatchSource::new();
    for version in 1..=4 {
        source.push_list(vec![config_map("default", "a", "1")], &version.to_string());
        source.push_watch_error(SourceError::Unauthorized("watch is forbidden".into()));
    }
    let h = start(source, test_config());

    let result = tokio::time::timeout(WAIT, h.task)
        .await
        .expect("informer should give up")
        .unwrap();
    match result {
        Err(Error::WatchFailed { attempts, source }) => {
            assert_eq!(attempts, 4);
            assert_eq!(source, SourceError::Unauthorized("watch is forbidden".into()));
        }
        other => panic!("expected WatchFailed, got {other:?}"),
    }
    // Every List succeeded, so the cache stayed synced throughout
    assert!(h.store.has_synced());
    assert_eq!(h.source.list_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_received_event_clears_watch_failures() {
    let source = FakeWatchSource::new();
    source.push_list(vec![], "1");
    source.push_watch_error(SourceError::Other("upgrade rejected".into()));
    source.push_list(vec![], "2");
    let events = source.push_watch();
    events
        .send(Ok(WatchEvent::Added(config_map("default", "a", "3"))))
        .unwrap();
    events
        .send(Err(SourceError::Other("connection reset".into())))
        .unwrap();
    source.push_list(vec![config_map("default", "a", "3")], "3");
    let config = InformerConfig {
        max_consecutive_failures: 1,
        ..test_config()
    };
    let h = start(source, config);

    eventually(WAIT, || h.source.watch_versions().len() == 3).await;
    assert_eq!(h.source.list_calls(), 3);
    assert!(!h.task.is_finished(), "a session that delivered events is not a repeat failure");

    h.cancel.cancel();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_empty_watch_session_delays_rewatch() {
    let source = FakeWatchSource::new();
    source.push_list(vec![], "1");
    drop(source.push_watch());
    let _events = source.push_watch();
    let started = tokio::time::Instant::now();
    let h = start(source, test_config());

    eventually(WAIT, || h.source.watch_versions().len() == 2).await;
    assert!(started.elapsed() >= Duration::from_millis(10));
    assert_eq!(h.source.watch_versions(), vec!["1".to_string(), "1".to_string()]);
    assert_eq!(h.source.list_calls(), 1);

    h.cancel.cancel();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_list_recovers_after_transient_failures() {
    let source = FakeWatchSource::new();
    source.push_list_error(SourceError::Other("connection reset".into()));
    source.push_list_error(SourceError::Throttled("slow down".into()));
    source.push_list(vec![config_map("default", "a", "1")], "3");
    let h = start(source, test_config());

    tokio::time::timeout(WAIT, h.store.wait_for_sync())
        .await
        .expect("cache should sync once List succeeds");
    assert_eq!(h.source.list_calls(), 3);
    assert_eq!(h.store.len(), 1);

    h.cancel.cancel();
    h.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_repeated_list_failures_are_fatal() {
    let source = FakeWatchSource::new();
    for _ in 0..4 {
        source.push_list_error(SourceError::Unauthorized("forbidden".into()));
    }
    let h = start(source, test_config());

    let result = tokio::time::timeout(WAIT, h.task)
        .await
        .expect("informer should give up")
        .unwrap();
    match result {
        Err(Error::WatchFailed { attempts, source }) => {
            assert_eq!(attempts, 4);
            assert_eq!(source, SourceError::Unauthorized("forbidden".into()));
        }
        other => panic!("expected WatchFailed, got {other:?}"),
    }
    assert!(!h.store.has_synced());
}

#[tokio::test(start_paused = true)]
async fn test_resync_replays_cached_objects() {
    let source = FakeWatchSource::new();
    source.push_list(
        vec![config_map("default", "a", "1"), config_map("default", "b", "1")],
        "1",
    );
    let _events = source.push_watch();
    let config = InformerConfig {
        resync_period: Some(Duration::from_secs(30)),
        ..test_config()
    };
    let h = start(source, config);
    tokio::time::timeout(WAIT, h.store.wait_for_sync()).await.unwrap();
    drain_queue(&h.queue).await;
    assert!(h.queue.is_empty());

    tokio::time::sleep(Duration::from_secs(31)).await;
    eventually(WAIT, || h.queue.len() == 2).await;
    assert_eq!(drain_queue(&h.queue).await, names(&["a", "b"]));

    h.cancel.cancel();
    h.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancel_while_listing_returns_cleanly() {
    let source = FakeWatchSource::new();
    let h = start(source, test_config());
    eventually(WAIT, || h.source.list_calls() == 1).await;

    h.cancel.cancel();
    tokio::time::timeout(WAIT, h.task)
        .await
        .expect("informer should stop")
        .unwrap()
        .unwrap();
    assert!(!h.store.has_synced());
}

#[tokio::test]
async fn test_keyless_watch_objects_are_ignored() {
    let source = FakeWatchSource::new();
    source.push_list(vec![], "1");
    let events = source.push_watch();
    let h = start(source, test_config());
    tokio::time::timeout(WAIT, h.store.wait_for_sync()).await.unwrap();

    events.send(Ok(WatchEvent::Added(ConfigMap::default()))).unwrap();
    events
        .send(Ok(WatchEvent::Added(config_map("default", "a", "2"))))
        .unwrap();
    eventually(WAIT, || h.queue.len() == 1).await;
    assert_eq!(h.store.keys(), vec![ResourceKey::namespaced("default", "a")]);

    h.cancel.cancel();
    h.task.await.unwrap().unwrap();
}
