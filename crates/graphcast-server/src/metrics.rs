//! Metrics collection and export for graphcast.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use graphcast_core::PublishReport;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "graphcast_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "graphcast_connections_active";
    pub const CHANNELS_ACTIVE: &str = "graphcast_channels_active";
    pub const PUBLISHES_TOTAL: &str = "graphcast_publishes_total";
    pub const PUBLISHED_BYTES: &str = "graphcast_published_bytes";
    pub const DELIVERIES_TOTAL: &str = "graphcast_deliveries_total";
    pub const DROPPED_TOTAL: &str = "graphcast_dropped_total";
    pub const ERRORS_TOTAL: &str = "graphcast_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_gauge!(
        names::CHANNELS_ACTIVE,
        "Current number of graphs with connections"
    );
    metrics::describe_counter!(names::PUBLISHES_TOTAL, "Total number of publish calls");
    metrics::describe_counter!(names::PUBLISHED_BYTES, "Total bytes of published payloads");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Total number of payloads enqueued for connections"
    );
    metrics::describe_counter!(
        names::DROPPED_TOTAL,
        "Payloads dropped or connections evicted because of slow consumers"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a publish and its fan-out.
pub fn record_publish(bytes: usize, report: &PublishReport) {
    counter!(names::PUBLISHES_TOTAL).increment(1);
    counter!(names::PUBLISHED_BYTES).increment(bytes as u64);
    counter!(names::DELIVERIES_TOTAL).increment(report.recipients as u64);
    if report.displaced > 0 {
        counter!(names::DROPPED_TOTAL, "reason" => "displaced").increment(report.displaced as u64);
    }
    if report.evicted > 0 {
        counter!(names::DROPPED_TOTAL, "reason" => "evicted").increment(report.evicted as u64);
    }
}

/// Update active channel count.
pub fn set_active_channels(count: usize) {
    gauge!(names::CHANNELS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
