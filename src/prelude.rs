//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use reconcile_controller::prelude::*;
//! ```
//!
//! This brings into scope:
//! - The controller and its lifecycle phase
//! - The cache, work queue and key types
//! - The reconciler and watch source traits
//! - Config types (ControllerConfig, ServerConfig)
//! - Common error types

pub use crate::controller::cache::{Store, SyncState};
pub use crate::controller::events::{DeletePolicy, ResourceEvent};
pub use crate::controller::key::{KeyError, ResourceKey};
pub use crate::controller::kube_source::KubeWatchSource;
pub use crate::controller::lifecycle::{Controller, Phase};
pub use crate::controller::queue::WorkQueue;
pub use crate::controller::reconciler::{
    from_fn, InspectReconciler, Reconciler, ReconcilerError,
};
pub use crate::controller::source::{
    ObjectListing, SourceError, WatchEvent, WatchFilter, WatchSource,
};

pub use crate::config::{ControllerConfig, ServerConfig};

pub use crate::error::Error;
