//! # Kubernetes Watch Source
//!
//! [`WatchSource`] backed by a `kube::Api`. The namespace (or cluster scope)
//! is bound when the `Api` is constructed.

use crate::constants::WATCH_TIMEOUT_SECS;
use crate::controller::source::{
    ObjectListing, SourceError, WatchEvent, WatchFilter, WatchSource, WatchStream,
};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use kube::api::{Api, ListParams, WatchParams};
use serde::de::DeserializeOwned;
use std::fmt::{self, Debug};
use tracing::trace;

pub struct KubeWatchSource<K> {
    api: Api<K>,
}

impl<K> Debug for KubeWatchSource<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeWatchSource").finish_non_exhaustive()
    }
}

impl<K> KubeWatchSource<K> {
    pub fn new(api: Api<K>) -> Self {
        Self { api }
    }
}

fn list_params(filter: &WatchFilter) -> ListParams {
    let mut lp = ListParams::default();
    if let Some(labels) = &filter.label_selector {
        lp = lp.labels(labels);
    }
    if let Some(fields) = &filter.field_selector {
        lp = lp.fields(fields);
    }
    lp
}

fn watch_params(filter: &WatchFilter) -> WatchParams {
    let mut wp = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
    if let Some(labels) = &filter.label_selector {
        wp = wp.labels(labels);
    }
    if let Some(fields) = &filter.field_selector {
        wp = wp.fields(fields);
    }
    wp
}

/// Classify a client error the same way regardless of where it surfaced
pub fn classify(error: kube::Error) -> SourceError {
    match error {
        kube::Error::Api(status) => SourceError::from_status(status.code, status.message),
        other => SourceError::Other(other.to_string()),
    }
}

fn convert<K>(event: kube::api::WatchEvent<K>) -> Result<WatchEvent<K>, SourceError> {
    match event {
        kube::api::WatchEvent::Added(obj) => Ok(WatchEvent::Added(obj)),
        kube::api::WatchEvent::Modified(obj) => Ok(WatchEvent::Modified(obj)),
        kube::api::WatchEvent::Deleted(obj) => Ok(WatchEvent::Deleted(obj)),
        kube::api::WatchEvent::Bookmark(bookmark) => {
            Ok(WatchEvent::Bookmark(bookmark.metadata.resource_version))
        }
        // Errors delivered in-band, most commonly 410 Gone once the version is compacted
        kube::api::WatchEvent::Error(status) => {
            Err(SourceError::from_status(status.code, status.message))
        }
    }
}

#[async_trait]
impl<K> WatchSource<K> for KubeWatchSource<K>
where
    K: Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn list(&self, filter: &WatchFilter) -> Result<ObjectListing<K>, SourceError> {
        let list = self.api.list(&list_params(filter)).await.map_err(classify)?;
        trace!(items = list.items.len(), "listed objects");
        Ok(ObjectListing {
            items: list.items,
            resource_version: list.metadata.resource_version,
        })
    }

    async fn watch(
        &self,
        filter: &WatchFilter,
        resource_version: &str,
    ) -> Result<WatchStream<K>, SourceError> {
        let stream = self
            .api
            .watch(&watch_params(filter), resource_version)
            .await
            .map_err(classify)?;
        Ok(stream
            .map_err(classify)
            .and_then(|event| futures::future::ready(convert(event)))
            .boxed())
    }
}
