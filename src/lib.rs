//! Reconcile Controller Library
//!
//! A level-triggered Kubernetes controller: an informer keeps an in-memory
//! cache current, change notifications are reduced to keys on a
//! deduplicating, rate-limited work queue, and a pool of workers reconciles
//! each key against the cached object.
//!
//! ```text
//! watch events -> EventHandler -> WorkQueue -> ReconcileEngine -> Reconciler
//!                                                   |
//!                                                 Store
//! ```
//!
//! [`Controller`](controller::lifecycle::Controller) ties the pieces
//! together and orders startup and shutdown.

pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod server;

pub use error::{Error, Result};
