//! # Watch Loop
//!
//! Builds the controller for `apps/v1` Deployments and runs it until a
//! shutdown signal arrives or the controller fails.

use crate::config::{ControllerConfig, ServerConfig};
use crate::controller::kube_source::KubeWatchSource;
use crate::controller::lifecycle::{Controller, Phase};
use crate::controller::reconciler::InspectReconciler;
use crate::controller::source::WatchFilter;
use crate::runtime::{initialization, shutdown};
use crate::server::ServerState;
use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::Api;
use kube::Client;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What the controller watches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchTarget {
    /// Namespace to watch; `None` watches every namespace
    pub namespace: Option<String>,
    pub filter: WatchFilter,
}

/// Run the controller watch loop
///
/// Returns once the controller has stopped and the probe server has shut down.
///
/// # Errors
///
/// Returns an error if the probe server cannot start or the controller stops
/// with a fatal error (sync timeout, persistent watch failure).
pub async fn run_watch_loop(
    client: Client,
    target: WatchTarget,
    controller_config: &ControllerConfig,
    server_config: &ServerConfig,
) -> Result<()> {
    let api: Api<Deployment> = match &target.namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    };

    let watch_span = tracing::info_span!(
        "controller.watch",
        resource.kind = "Deployment",
        resource.namespace = target.namespace.as_deref().unwrap_or("*")
    );
    watch_span.in_scope(|| {
        info!(
            workers = controller_config.workers,
            queue = %controller_config.queue_name,
            "Starting Deployment controller"
        );
    });

    let controller: Controller<Deployment> = Controller::new(
        Arc::new(KubeWatchSource::new(api)),
        Arc::new(InspectReconciler),
        controller_config,
        target.filter,
    );

    let cancel = CancellationToken::new();
    shutdown::spawn_signal_handler(cancel.clone());

    let server_shutdown = CancellationToken::new();
    let server_state = Arc::new(ServerState::new(controller.subscribe()));
    let server = initialization::start_probe_server(
        server_config,
        server_state,
        server_shutdown.clone(),
    )
    .await?;

    let mut phase = controller.subscribe();
    tokio::spawn(async move {
        let ready = phase
            .wait_for(|p| *p >= Phase::Ready)
            .await
            .is_ok_and(|p| *p == Phase::Ready);
        if ready {
            info!(
                started_at = %chrono::Utc::now().to_rfc3339(),
                "Controller synced and started"
            );
        }
    });

    let result = controller.run(cancel).await;

    server_shutdown.cancel();
    if let Err(e) = server.await {
        warn!(error = %e, "HTTP server task ended abnormally");
    }

    result.context("Controller stopped with an error")
}
