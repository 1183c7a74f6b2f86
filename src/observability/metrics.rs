use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

use crate::error::{AppError, Result};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Prometheus facade for the payment API. Without an installed recorder every
/// call is a no-op.
#[derive(Debug, Clone, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    pub fn record_idempotency_outcome(&self, outcome: &str) {
        counter!("idempotency_requests_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_idempotency_rejection(&self, reason: &str) {
        counter!("idempotency_rejections_total", "reason" => reason.to_string()).increment(1);
    }

    pub fn record_store_error(&self, operation: &str) {
        counter!("idempotency_store_errors_total", "operation" => operation.to_string()).increment(1);
    }

    pub fn record_records_purged(&self, count: u64) {
        counter!("idempotency_records_purged_total").increment(count);
    }

    pub fn record_payment_processed(&self, kind: &str, currency: &str) {
        counter!("payments_processed_total", "kind" => kind.to_string(), "currency" => currency.to_string()).increment(1);
    }

    pub fn record_payment_latency(&self, kind: &str, duration_ms: f64) {
        histogram!("payment_processing_duration_ms", "kind" => kind.to_string()).record(duration_ms);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder once and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to install Prometheus recorder: {}", e)))?;
    describe_metrics();

    METRICS.get_or_init(Metrics::new);
    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

fn describe_metrics() {
    describe_counter!("idempotency_requests_total", Unit::Count, "Idempotent requests by outcome (replayed, captured, uncached)");
    describe_counter!("idempotency_rejections_total", Unit::Count, "Idempotent requests rejected before execution");
    describe_counter!("idempotency_store_errors_total", Unit::Count, "Failed or timed out idempotency store operations");
    describe_counter!("idempotency_records_purged_total", Unit::Count, "Expired idempotency records removed by the sweep job");

    describe_counter!("payments_processed_total", Unit::Count, "Payments processed by the handlers");
    describe_histogram!("payment_processing_duration_ms", Unit::Milliseconds, "Payment handler latency in milliseconds");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
