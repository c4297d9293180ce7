//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default number of reconcile workers
pub const DEFAULT_WORKERS: usize = 2;

/// Default per-key backoff base delay (milliseconds)
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 5;

/// Default per-key backoff ceiling (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 1_000_000;

/// Default overall requeue rate (tokens per second)
pub const DEFAULT_BUCKET_QPS: f64 = 10.0;

/// Default overall requeue burst size
pub const DEFAULT_BUCKET_BURST: u32 = 100;

/// Default number of rate-limited requeues before a key is dropped
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default bound on the wait for the initial List to be ingested (seconds)
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 120;

/// Default delay before the first relist after a watch failure (milliseconds)
pub const DEFAULT_RELIST_BACKOFF_START_MS: u64 = 800;

/// Default ceiling on relist backoff (milliseconds)
pub const DEFAULT_RELIST_BACKOFF_MAX_MS: u64 = 30_000;

/// Consecutive List failures after which the watch is declared dead
pub const DEFAULT_MAX_CONSECUTIVE_WATCH_FAILURES: u32 = 10;

/// Server-side timeout for a single watch request (seconds)
/// Must stay below the API server's 295s hard limit
pub const WATCH_TIMEOUT_SECS: u32 = 290;

/// Queue name used for metrics labels and logs
pub const DEFAULT_QUEUE_NAME: &str = "deployments";

/// Namespace watched when none is given
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default resync period (seconds); 0 disables periodic resync
pub const DEFAULT_RESYNC_PERIOD_SECS: u64 = 0;
