//! Exporter self-health metrics.

use std::time::Duration;

use parking_lot::RwLock;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// Name of the cycle duration histogram.
pub const REQUEST_PROCESSING_SECONDS: &str = "request_processing_seconds";

/// Outcome of the most recent collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    /// No cycle has run yet.
    Pending,
    /// The last cycle completed.
    Succeeded,
    /// The last cycle aborted.
    Failed,
}

/// Health metrics for the exporter itself.
///
/// The metric handles are shared clones, so registering them in a fresh
/// registry on every scrape keeps their values.
#[derive(Debug)]
pub struct ExporterHealth {
    up: Gauge,
    errors: Counter,
    http_code: Gauge,
    cycle_duration: Histogram,
    last_cycle: RwLock<CycleStatus>,
}

impl Default for ExporterHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ExporterHealth {
    /// Create health metrics with `up = 0`, no errors and `http_code = 0`.
    pub fn new() -> Self {
        Self {
            up: Gauge::default(),
            errors: Counter::default(),
            http_code: Gauge::default(),
            cycle_duration: Histogram::new(exponential_buckets(0.005, 2.0, 12)),
            last_cycle: RwLock::new(CycleStatus::Pending),
        }
    }

    /// Register the health metrics under `{name}_exporter_*`.
    pub fn register(&self, registry: &mut Registry, name: &str) {
        registry.register(
            format!("{}_exporter_up", name),
            "Was the last collection cycle successful",
            self.up.clone(),
        );
        registry.register(
            format!("{}_exporter_errors", name),
            "Number of failed collection cycles",
            self.errors.clone(),
        );
        registry.register(
            format!("{}_exporter_http_code", name),
            "HTTP status of the last API request, -1 on timeout",
            self.http_code.clone(),
        );
        registry.register(
            REQUEST_PROCESSING_SECONDS,
            "Time spent running a collection cycle",
            self.cycle_duration.clone(),
        );
    }

    /// Mark the cycle as completed.
    pub fn record_success(&self) {
        self.up.set(1);
        *self.last_cycle.write() = CycleStatus::Succeeded;
    }

    /// Mark the cycle as aborted.
    pub fn record_failure(&self) {
        self.up.set(0);
        self.errors.inc();
        *self.last_cycle.write() = CycleStatus::Failed;
    }

    /// Record the HTTP code of the latest API request.
    pub fn set_http_code(&self, code: i64) {
        self.http_code.set(code);
    }

    /// Record how long a cycle took.
    pub fn observe_cycle(&self, elapsed: Duration) {
        self.cycle_duration.observe(elapsed.as_secs_f64());
    }

    /// Current value of the up gauge.
    pub fn up(&self) -> i64 {
        self.up.get()
    }

    /// Number of failed cycles so far.
    pub fn errors(&self) -> u64 {
        self.errors.get()
    }

    /// Last recorded HTTP code.
    pub fn http_code(&self) -> i64 {
        self.http_code.get()
    }

    /// Status of the most recent cycle.
    pub fn last_cycle(&self) -> CycleStatus {
        *self.last_cycle.read()
    }
}
