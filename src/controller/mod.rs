//! # Controller
//!
//! Core controller modules, leaf-first.
//!
//! - `key`: object keys (`namespace/name`)
//! - `cache`: in-memory store of the last observed objects
//! - `rate_limiter`: requeue delay policies
//! - `queue`: deduplicating, rate-limited work queue
//! - `events`: routes cache changes into the queue
//! - `source` / `kube_source`: List and Watch abstraction and its kube implementation
//! - `informer`: keeps the cache current and feeds the event handler
//! - `reconciler`: the reconcile action trait
//! - `error_policy`: retry and relist decisions
//! - `engine`: worker loop
//! - `lifecycle`: startup ordering and coordinated shutdown

pub mod cache;
pub mod engine;
pub mod error_policy;
pub mod events;
pub mod informer;
pub mod key;
pub mod kube_source;
pub mod lifecycle;
pub mod queue;
pub mod rate_limiter;
pub mod reconciler;
pub mod source;
