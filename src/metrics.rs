//! Fetch engine metrics
//!
//! The engine reports through the [`MetricsSink`] trait so tests can observe
//! exactly what was counted. [`RecorderMetrics`] forwards everything to the
//! `metrics` crate facade, and [`init_metrics`] installs the Prometheus
//! exporter that scrapes it.
//!
//! ## Metric names
//!
//! - `requests_total` - every attempt, retries included
//! - `requests_successful_total` - attempts that produced a payload
//! - `requests_failed_{client,server,data}_total` - requests whose retries were exhausted
//! - `retries_total`, `retry_backoff_duration_seconds`
//! - `batch_duration_seconds`, `batch_failure_rate`
//! - `circuit_state` - 0 closed, 1 open, 2 half-open, 3 terminated, 4 complete

use crate::downloader::circuit::CircuitState;
use crate::fetcher::{BatchResult, ErrorKind};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Receiver of engine counters
pub trait MetricsSink: Send + Sync {
    /// One attempt is about to hit the network.
    fn request_attempted(&self);

    /// An attempt produced a payload.
    fn request_succeeded(&self);

    /// A request gave up with a failure of `kind`.
    fn request_failed(&self, kind: ErrorKind);

    /// Attempt `attempt` failed and the next one starts after `backoff`.
    fn retry_scheduled(&self, attempt: u32, backoff: Duration);

    /// A batch finished.
    fn batch_completed(&self, result: &BatchResult);

    /// The circuit breaker moved between states.
    fn circuit_transition(&self, from: CircuitState, to: CircuitState);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn request_attempted(&self) {}
    fn request_succeeded(&self) {}
    fn request_failed(&self, _kind: ErrorKind) {}
    fn retry_scheduled(&self, _attempt: u32, _backoff: Duration) {}
    fn batch_completed(&self, _result: &BatchResult) {}
    fn circuit_transition(&self, _from: CircuitState, _to: CircuitState) {}
}

/// Sink backed by the `metrics` crate facade
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetrics;

impl MetricsSink for RecorderMetrics {
    fn request_attempted(&self) {
        counter!("requests_total").increment(1);
    }

    fn request_succeeded(&self) {
        counter!("requests_successful_total").increment(1);
    }

    fn request_failed(&self, kind: ErrorKind) {
        match kind {
            ErrorKind::Client => counter!("requests_failed_client_total").increment(1),
            ErrorKind::Server => counter!("requests_failed_server_total").increment(1),
            ErrorKind::Data => counter!("requests_failed_data_total").increment(1),
            ErrorKind::Cancelled => counter!("requests_cancelled_total").increment(1),
        }
    }

    fn retry_scheduled(&self, attempt: u32, backoff: Duration) {
        counter!("retries_total", "attempt" => attempt.to_string()).increment(1);
        histogram!("retry_backoff_duration_seconds").record(backoff.as_secs_f64());
        debug!(
            attempt = attempt,
            backoff_ms = backoff.as_millis() as u64,
            "Retry backoff recorded"
        );
    }

    fn batch_completed(&self, result: &BatchResult) {
        histogram!("batch_duration_seconds").record(result.elapsed().as_secs_f64());
        gauge!("batch_failure_rate").set(result.failure_rate());
    }

    fn circuit_transition(&self, _from: CircuitState, to: CircuitState) {
        gauge!("circuit_state").set(to.as_gauge());
    }
}

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: later calls return immediately.
///
/// # Arguments
/// * `addr` - Socket address to bind the scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!("requests_total", Unit::Count, "Request attempts, retries included");
    describe_counter!(
        "requests_successful_total",
        Unit::Count,
        "Attempts that returned a decodable 2xx response"
    );
    describe_counter!(
        "requests_failed_client_total",
        Unit::Count,
        "Requests that exhausted retries on 4xx responses"
    );
    describe_counter!(
        "requests_failed_server_total",
        Unit::Count,
        "Requests that exhausted retries on 5xx responses"
    );
    describe_counter!(
        "requests_failed_data_total",
        Unit::Count,
        "Requests that exhausted retries on transport or decoding failures"
    );
    describe_counter!("retries_total", Unit::Count, "Scheduled retries");
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Backoff slept before a retry"
    );
    describe_histogram!("batch_duration_seconds", Unit::Seconds, "Wall time per batch");
    describe_gauge!("batch_failure_rate", "Failure rate of the latest batch");
    describe_gauge!("circuit_state", "Current circuit breaker state");

    *initialized = true;
    info!("Metrics system initialized on {}", addr);
    Ok(())
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}
