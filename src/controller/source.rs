//! # Watch Source
//!
//! Abstraction over the API that the informer lists and watches.
//!
//! The production implementation is [`KubeWatchSource`](crate::controller::kube_source::KubeWatchSource);
//! tests script their own source to control exactly what the informer sees.

use async_trait::async_trait;
use futures::stream::BoxStream;

/// Label and field selectors applied to both List and Watch requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchFilter {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

impl WatchFilter {
    #[must_use]
    pub fn labels(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    #[must_use]
    pub fn fields(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = Some(selector.into());
        self
    }
}

/// Result of a List request
#[derive(Debug, Clone)]
pub struct ObjectListing<K> {
    pub items: Vec<K>,
    /// Version to resume watching from; `None` lets the server pick
    pub resource_version: Option<String>,
}

/// A single change observed on a watch stream
#[derive(Debug, Clone)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// Progress marker carrying the latest resource version
    Bookmark(String),
}

/// Why a List or Watch request failed
///
/// The variant decides how the informer recovers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The requested resource version is no longer available (HTTP 410)
    #[error("resource version expired: {0}")]
    Expired(String),
    /// The server asked the client to slow down (HTTP 429)
    #[error("throttled by the API server: {0}")]
    Throttled(String),
    /// Credentials or RBAC were rejected (HTTP 401/403)
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The resource type is not served (HTTP 404)
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Other(String),
}

impl SourceError {
    /// Short label used for metrics and logs
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Expired(_) => "expired",
            Self::Throttled(_) => "throttled",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Other(_) => "error",
        }
    }

    /// Classify an HTTP status code returned by the API server
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            410 => Self::Expired(message),
            429 => Self::Throttled(message),
            401 | 403 => Self::Unauthorized(message),
            404 => Self::NotFound(message),
            _ => Self::Other(message),
        }
    }
}

/// Stream of watch events; ends when the server closes the watch
pub type WatchStream<K> = BoxStream<'static, Result<WatchEvent<K>, SourceError>>;

/// Something the informer can List and Watch
#[async_trait]
pub trait WatchSource<K>: Send + Sync {
    /// Fetch every object matching `filter`
    async fn list(&self, filter: &WatchFilter) -> Result<ObjectListing<K>, SourceError>;

    /// Stream changes that happened after `resource_version`
    async fn watch(
        &self,
        filter: &WatchFilter,
        resource_version: &str,
    ) -> Result<WatchStream<K>, SourceError>;
}
