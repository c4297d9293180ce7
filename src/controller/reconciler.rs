//! # Reconciler
//!
//! The action run for every key handed out by the work queue.
//!
//! A reconcile receives the key and the cached object, or `None` if the
//! object no longer exists. It must be idempotent: the same key may be
//! reconciled any number of times, and only the latest cached state matters.

use crate::controller::key::ResourceKey;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::info;

/// Reconcile failure, deciding whether the key is retried
#[derive(Debug, thiserror::Error)]
pub enum ReconcilerError {
    /// Transient failure, retried with backoff
    #[error("reconcile failed: {0:#}")]
    Failed(#[from] anyhow::Error),
    /// Failure that retrying cannot fix; the key is dropped immediately
    #[error("reconcile failed permanently: {0:#}")]
    Terminal(anyhow::Error),
    /// The reconcile action panicked
    #[error("reconcile panicked: {0}")]
    Panicked(String),
}

impl ReconcilerError {
    pub fn terminal(error: impl Into<anyhow::Error>) -> Self {
        Self::Terminal(error.into())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

/// Drives one object toward its desired state
#[async_trait]
pub trait Reconciler<K>: Send + Sync {
    async fn reconcile(&self, key: &ResourceKey, obj: Option<Arc<K>>)
        -> Result<(), ReconcilerError>;
}

/// Adapter turning an async closure into a [`Reconciler`]
pub struct FnReconciler<F, K> {
    f: F,
    _object: PhantomData<fn(K)>,
}

impl<F, K> fmt::Debug for FnReconciler<F, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnReconciler").finish_non_exhaustive()
    }
}

impl<F, Fut, K> FnReconciler<F, K>
where
    F: Fn(ResourceKey, Option<Arc<K>>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ReconcilerError>> + Send,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _object: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, K> Reconciler<K> for FnReconciler<F, K>
where
    F: Fn(ResourceKey, Option<Arc<K>>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ReconcilerError>> + Send,
    K: Send + Sync + 'static,
{
    async fn reconcile(
        &self,
        key: &ResourceKey,
        obj: Option<Arc<K>>,
    ) -> Result<(), ReconcilerError> {
        (self.f)(key.clone(), obj).await
    }
}

/// Build a [`Reconciler`] from an async closure
pub fn from_fn<F, Fut, K>(f: F) -> FnReconciler<F, K>
where
    F: Fn(ResourceKey, Option<Arc<K>>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ReconcilerError>> + Send,
{
    FnReconciler::new(f)
}

/// Logs what the cache holds for each key and changes nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct InspectReconciler;

#[async_trait]
impl<K> Reconciler<K> for InspectReconciler
where
    K: kube::Resource + Send + Sync + 'static,
{
    async fn reconcile(
        &self,
        key: &ResourceKey,
        obj: Option<Arc<K>>,
    ) -> Result<(), ReconcilerError> {
        match obj {
            Some(obj) => {
                let meta = obj.meta();
                info!(
                    resource.key = %key,
                    resource.version = meta.resource_version.as_deref().unwrap_or("unknown"),
                    resource.generation = meta.generation.unwrap_or(0),
                    "Sync/Add/Update for {}",
                    key
                );
            }
            None => info!(resource.key = %key, "{} does not exist anymore", key),
        }
        Ok(())
    }
}
