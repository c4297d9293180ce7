//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! Work queue (labelled by queue `name`):
//! - `reconcile_controller_workqueue_depth` - Items waiting to be handed to a worker
//! - `reconcile_controller_workqueue_adds_total` - Total number of adds handled by the queue
//! - `reconcile_controller_workqueue_retries_total` - Total number of rate-limited re-adds
//! - `reconcile_controller_workqueue_drops_total` - Keys dropped after exhausting retries or failing terminally
//! - `reconcile_controller_workqueue_queue_duration_seconds` - Time an item waits before a worker picks it up
//! - `reconcile_controller_workqueue_work_duration_seconds` - Time a worker holds an item
//!
//! Controller:
//! - `reconcile_controller_reconciliations_total` - Total number of reconciliations
//! - `reconcile_controller_reconciliation_errors_total` - Total number of failed reconciliations
//! - `reconcile_controller_reconciliation_panics_total` - Reconciliations that panicked
//! - `reconcile_controller_reconciliation_duration_seconds` - Duration of reconciliations
//! - `reconcile_controller_watch_events_total` - Watch events ingested, by event type
//! - `reconcile_controller_watch_restarts_total` - Relists, by reason
//! - `reconcile_controller_cached_objects` - Objects currently held in the cache
//! - `reconcile_controller_ready` - 1 while the controller is in the `Ready` phase

use anyhow::Result;
use prometheus::{
    core::Collector, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry,
};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static WORKQUEUE_DEPTH: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "reconcile_controller_workqueue_depth",
            "Current number of items waiting in the work queue",
        ),
        &["name"],
    )
    .expect("Failed to create WORKQUEUE_DEPTH metric - this should never happen")
});

static WORKQUEUE_ADDS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reconcile_controller_workqueue_adds_total",
            "Total number of adds handled by the work queue",
        ),
        &["name"],
    )
    .expect("Failed to create WORKQUEUE_ADDS_TOTAL metric - this should never happen")
});

static WORKQUEUE_RETRIES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reconcile_controller_workqueue_retries_total",
            "Total number of rate-limited re-adds",
        ),
        &["name"],
    )
    .expect("Failed to create WORKQUEUE_RETRIES_TOTAL metric - this should never happen")
});

static WORKQUEUE_DROPS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reconcile_controller_workqueue_drops_total",
            "Total number of keys dropped without a successful reconcile",
        ),
        &["name"],
    )
    .expect("Failed to create WORKQUEUE_DROPS_TOTAL metric - this should never happen")
});

static WORKQUEUE_QUEUE_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "reconcile_controller_workqueue_queue_duration_seconds",
            "How long an item stays in the work queue before a worker picks it up",
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]),
        &["name"],
    )
    .expect("Failed to create WORKQUEUE_QUEUE_DURATION metric - this should never happen")
});

static WORKQUEUE_WORK_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "reconcile_controller_workqueue_work_duration_seconds",
            "How long a worker holds an item from the work queue",
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]),
        &["name"],
    )
    .expect("Failed to create WORKQUEUE_WORK_DURATION metric - this should never happen")
});

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "reconcile_controller_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "reconcile_controller_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_PANICS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "reconcile_controller_reconciliation_panics_total",
        "Total number of reconciliations that panicked",
    )
    .expect("Failed to create RECONCILIATION_PANICS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "reconcile_controller_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static WATCH_EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reconcile_controller_watch_events_total",
            "Total number of watch events ingested by event type",
        ),
        &["type"],
    )
    .expect("Failed to create WATCH_EVENTS_TOTAL metric - this should never happen")
});

static WATCH_RESTARTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "reconcile_controller_watch_restarts_total",
            "Total number of relists by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create WATCH_RESTARTS_TOTAL metric - this should never happen")
});

static CACHED_OBJECTS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "reconcile_controller_cached_objects",
        "Current number of objects held in the cache",
    )
    .expect("Failed to create CACHED_OBJECTS metric - this should never happen")
});

static CONTROLLER_READY: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "reconcile_controller_ready",
        "Whether the controller has synced and is running workers (1) or not (0)",
    )
    .expect("Failed to create CONTROLLER_READY metric - this should never happen")
});

fn register<C: Collector + Clone + 'static>(collector: &C) -> Result<()> {
    match REGISTRY.register(Box::new(collector.clone())) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Register every metric with [`REGISTRY`]
///
/// Safe to call more than once.
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    register(&*WORKQUEUE_DEPTH)?;
    register(&*WORKQUEUE_ADDS_TOTAL)?;
    register(&*WORKQUEUE_RETRIES_TOTAL)?;
    register(&*WORKQUEUE_DROPS_TOTAL)?;
    register(&*WORKQUEUE_QUEUE_DURATION)?;
    register(&*WORKQUEUE_WORK_DURATION)?;
    register(&*RECONCILIATIONS_TOTAL)?;
    register(&*RECONCILIATION_ERRORS_TOTAL)?;
    register(&*RECONCILIATION_PANICS_TOTAL)?;
    register(&*RECONCILIATION_DURATION)?;
    register(&*WATCH_EVENTS_TOTAL)?;
    register(&*WATCH_RESTARTS_TOTAL)?;
    register(&*CACHED_OBJECTS)?;
    register(&*CONTROLLER_READY)?;

    Ok(())
}

fn gauge_value(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

pub fn set_queue_depth(queue: &str, depth: usize) {
    WORKQUEUE_DEPTH
        .with_label_values(&[queue])
        .set(gauge_value(depth));
}

pub fn increment_queue_adds(queue: &str) {
    WORKQUEUE_ADDS_TOTAL.with_label_values(&[queue]).inc();
}

pub fn increment_queue_retries(queue: &str) {
    WORKQUEUE_RETRIES_TOTAL.with_label_values(&[queue]).inc();
}

pub fn increment_queue_drops(queue: &str) {
    WORKQUEUE_DROPS_TOTAL.with_label_values(&[queue]).inc();
}

pub fn observe_queue_latency(queue: &str, duration: f64) {
    WORKQUEUE_QUEUE_DURATION
        .with_label_values(&[queue])
        .observe(duration);
}

pub fn observe_work_duration(queue: &str, duration: f64) {
    WORKQUEUE_WORK_DURATION
        .with_label_values(&[queue])
        .observe(duration);
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn increment_reconciliation_panics() {
    RECONCILIATION_PANICS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_watch_events(event_type: &str) {
    WATCH_EVENTS_TOTAL.with_label_values(&[event_type]).inc();
}

pub fn increment_watch_restarts(reason: &str) {
    WATCH_RESTARTS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn set_cached_objects(count: usize) {
    CACHED_OBJECTS.set(gauge_value(count));
}

pub fn set_controller_ready(ready: bool) {
    CONTROLLER_READY.set(i64::from(ready));
}
