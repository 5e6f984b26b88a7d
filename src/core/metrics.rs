//! Prometheus metrics for monitoring the proxy.
//!
//! The registry lives behind [`init_metrics`]/[`get_metrics`]. The relay does
//! not touch it directly; it reports through a [`MetricsCollector`] handed to
//! it at construction, so tests can run without any process-wide state.

use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, GaugeVec, HistogramVec,
    IntCounterVec,
};
use std::sync::OnceLock;
use std::time::Duration;

/// Container for all application metrics.
pub struct Metrics {
    /// Total number of requests by method, endpoint and status
    pub request_count: IntCounterVec,

    /// Request duration histogram in seconds
    pub request_duration: HistogramVec,

    /// Number of currently active requests by endpoint
    pub active_requests: GaugeVec,

    /// Upstream calls by model, phase (initial/continuation) and outcome
    pub upstream_calls: IntCounterVec,

    /// Continuation attempts per orchestrated exchange
    pub continuation_attempts: HistogramVec,

    /// Estimated generation units relayed, by model
    pub generated_units: IntCounterVec,

    /// Finished exchanges by model and stop reason
    pub exchanges: IntCounterVec,

    /// Time to first delta in seconds for streaming calls
    pub ttft: HistogramVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize the metrics registry.
///
/// This should be called once at application startup. Subsequent calls will
/// return the same instance.
///
/// # Examples
///
/// ```no_run
/// use nim_proxy_rust::core::metrics::init_metrics;
///
/// let metrics = init_metrics();
/// metrics.request_count.with_label_values(&["GET", "/health", "200"]).inc();
/// ```
pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let request_count = register_int_counter_vec!(
            "nim_proxy_requests_total",
            "Total number of requests",
            &["method", "endpoint", "status_code"]
        )
        .expect("Failed to register request_count metric");

        let request_duration = register_histogram_vec!(
            "nim_proxy_request_duration_seconds",
            "Request duration in seconds",
            &["method", "endpoint"],
            vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
        )
        .expect("Failed to register request_duration metric");

        let active_requests = register_gauge_vec!(
            "nim_proxy_active_requests",
            "Number of active requests",
            &["endpoint"]
        )
        .expect("Failed to register active_requests metric");

        let upstream_calls = register_int_counter_vec!(
            "nim_proxy_upstream_calls_total",
            "Upstream completion calls",
            &["model", "phase", "outcome"]
        )
        .expect("Failed to register upstream_calls metric");

        let continuation_attempts = register_histogram_vec!(
            "nim_proxy_continuation_attempts",
            "Follow-up calls per exchange",
            &["model"],
            vec![0.0, 1.0, 2.0, 3.0, 5.0, 8.0]
        )
        .expect("Failed to register continuation_attempts metric");

        let generated_units = register_int_counter_vec!(
            "nim_proxy_generated_units_total",
            "Estimated generation units relayed to clients",
            &["model"]
        )
        .expect("Failed to register generated_units metric");

        let exchanges = register_int_counter_vec!(
            "nim_proxy_exchanges_total",
            "Finished exchanges by stop reason",
            &["model", "stop_reason"]
        )
        .expect("Failed to register exchanges metric");

        let ttft = register_histogram_vec!(
            "nim_proxy_ttft_seconds",
            "Time to first delta in seconds for streaming upstream calls",
            &["model", "phase"],
            vec![0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]
        )
        .expect("Failed to register ttft metric");

        Metrics {
            request_count,
            request_duration,
            active_requests,
            upstream_calls,
            continuation_attempts,
            generated_units,
            exchanges,
            ttft,
        }
    })
}

/// Get the global metrics instance.
///
/// # Panics
///
/// Panics if metrics have not been initialized via [`init_metrics`].
pub fn get_metrics() -> &'static Metrics {
    METRICS.get().expect("Metrics not initialized")
}

/// Phase-boundary hooks called by the relay.
///
/// Every method defaults to a no-op.
pub trait MetricsCollector: Send + Sync {
    /// One upstream call finished (`outcome` is `ok`, `error` or `aborted`).
    fn upstream_call(&self, _model: &str, _phase: &str, _outcome: &str) {}

    /// First delta of an upstream call arrived.
    fn first_delta(&self, _model: &str, _phase: &str, _elapsed: Duration) {}

    /// An exchange ended.
    fn exchange_finished(&self, _model: &str, _attempts: u32, _units: usize, _stop_reason: &str) {}
}

/// Collector reporting into the Prometheus registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusCollector;

impl MetricsCollector for PrometheusCollector {
    fn upstream_call(&self, model: &str, phase: &str, outcome: &str) {
        init_metrics()
            .upstream_calls
            .with_label_values(&[model, phase, outcome])
            .inc();
    }

    fn first_delta(&self, model: &str, phase: &str, elapsed: Duration) {
        init_metrics()
            .ttft
            .with_label_values(&[model, phase])
            .observe(elapsed.as_secs_f64());
    }

    fn exchange_finished(&self, model: &str, attempts: u32, units: usize, stop_reason: &str) {
        let metrics = init_metrics();
        metrics
            .continuation_attempts
            .with_label_values(&[model])
            .observe(attempts as f64);
        metrics
            .generated_units
            .with_label_values(&[model])
            .inc_by(units as u64);
        metrics
            .exchanges
            .with_label_values(&[model, stop_reason])
            .inc();
    }
}

/// Collector that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCollector;

impl MetricsCollector for NoopCollector {}
