//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics
//! and probe server startup.

use crate::config::{ControllerConfig, ServerConfig};
use crate::observability;
use crate::server::{start_server, ServerState};
use anyhow::{Context, Result};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Install ring as the process-wide rustls crypto provider
///
/// Must run before the Kubernetes client opens a TLS connection.
pub fn install_crypto_provider() {
    // Err means a provider is already installed, which is fine
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }
}

/// Filter directive used when `RUST_LOG` is not set
pub fn default_directive(log_level: &str) -> String {
    let level = match log_level.to_ascii_lowercase().as_str() {
        level @ ("error" | "warn" | "info" | "debug" | "trace") => level.to_string(),
        _ => "info".to_string(),
    };
    format!("reconcile_controller={level}")
}

/// Set up the tracing subscriber
///
/// `RUST_LOG` takes precedence over `LOG_LEVEL`; `LOG_FORMAT=text` selects
/// human-readable output, anything else emits JSON.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed.
pub fn init_tracing(config: &ControllerConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_directive(&config.log_level).into());

    let installed = if config.log_format.eq_ignore_ascii_case("text") {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    };
    installed.map_err(|e| anyhow::anyhow!(e))
}

pub fn log_build_info() {
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
}

/// Register metrics and start the probe server, waiting until it accepts connections
///
/// # Errors
///
/// Returns an error if metrics cannot be registered or the server does not
/// come up within the configured startup timeout.
pub async fn start_probe_server(
    config: &ServerConfig,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>> {
    observability::metrics::register_metrics().context("Failed to register metrics")?;

    let port = config.metrics_port;
    let server_state = Arc::clone(&state);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(port, server_state, shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    wait_for_server_ready(&state, &server_handle, config).await?;
    Ok(server_handle)
}

async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &JoinHandle<()>,
    config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = config.startup_timeout();
    let poll_interval = config.poll_interval();
    let start_time = std::time::Instant::now();

    loop {
        // Check if server task crashed
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_listening.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}
