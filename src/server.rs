//! # HTTP Server
//!
//! HTTP server for metrics, health checks, and Kubernetes probes.
//!
//! Provides endpoints:
//! - `/metrics` - Prometheus metrics in text format
//! - `/healthz` - Liveness probe (always returns 200)
//! - `/readyz` - Readiness probe (returns 200 only while the controller is `Ready`,
//!   with the current phase as JSON)
//!
//! The server runs on port 5000 by default (configurable via `METRICS_PORT` environment variable).

use crate::controller::lifecycle::Phase;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Debug)]
pub struct ServerState {
    /// Set once the listener is bound
    pub is_listening: AtomicBool,
    /// Controller phase, read by the readiness probe
    pub phase: watch::Receiver<Phase>,
}

impl ServerState {
    pub fn new(phase: watch::Receiver<Phase>) -> Self {
        Self {
            is_listening: AtomicBool::new(false),
            phase,
        }
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the probe endpoints until `shutdown` fires
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the server fails.
pub async fn start_server(
    port: u16,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
) -> Result<(), anyhow::Error> {
    let app = router(Arc::clone(&state));

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    state.is_listening.store(true, Ordering::Relaxed);

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}

fn gather() -> Vec<prometheus::proto::MetricFamily> {
    use crate::observability::metrics::REGISTRY;
    REGISTRY.gather()
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let phase = *state.phase.borrow();
    let status = if phase == Phase::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!({ "phase": phase.to_string() })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_healthz_always_ok() {
        let (_tx, rx) = watch::channel(Phase::Created);
        let app = router(Arc::new(ServerState::new(rx)));
        assert_eq!(status(app, "/healthz").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_follows_phase() {
        let (tx, rx) = watch::channel(Phase::Syncing);
        let state = Arc::new(ServerState::new(rx));

        assert_eq!(
            status(router(Arc::clone(&state)), "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        tx.send_replace(Phase::Ready);
        assert_eq!(
            status(router(Arc::clone(&state)), "/readyz").await,
            StatusCode::OK
        );

        tx.send_replace(Phase::Draining);
        assert_eq!(
            status(router(state), "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_readyz_reports_phase() {
        let (_tx, rx) = watch::channel(Phase::Watching);
        let app = router(Arc::new(ServerState::new(rx)));
        let response = app
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["phase"], "Watching");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        crate::observability::metrics::register_metrics().unwrap();
        let (_tx, rx) = watch::channel(Phase::Ready);
        let app = router(Arc::new(ServerState::new(rx)));
        assert_eq!(status(app, "/metrics").await, StatusCode::OK);
    }
}
