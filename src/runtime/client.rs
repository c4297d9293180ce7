//! # Client
//!
//! Resolves Kubernetes credentials: in-cluster service account first, then
//! the kubeconfig named by `KUBECONFIG` or `$HOME/.kube/config`.

use crate::error::Result;
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use tracing::{debug, info};

/// Build a client from whichever configuration is available
///
/// # Errors
///
/// Returns an error if neither in-cluster nor kubeconfig credentials can be
/// loaded, or the client cannot be constructed from them.
pub async fn create_client() -> Result<Client> {
    let config = match Config::incluster() {
        Ok(config) => {
            info!("Using in-cluster configuration");
            config
        }
        Err(e) => {
            debug!(error = %e, "Not running in a cluster, falling back to kubeconfig");
            let config = Config::from_kubeconfig(&KubeConfigOptions::default()).await?;
            info!(cluster_url = %config.cluster_url, "Using kubeconfig");
            config
        }
    };
    Ok(Client::try_from(config)?)
}
