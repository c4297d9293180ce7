//! # Errors
//!
//! Controller-level failures. Reconcile errors never reach this type; they
//! are absorbed by the workers.

use crate::controller::source::SourceError;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("cache did not sync within {0:?}")]
    SyncTimeout(Duration),

    #[error("watch failed after {attempts} consecutive attempts: {source}")]
    WatchFailed {
        attempts: u32,
        #[source]
        source: SourceError,
    },

    #[error("informer stopped unexpectedly: {0}")]
    InformerStopped(String),

    #[error("controller has already been started")]
    AlreadyStarted,

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
