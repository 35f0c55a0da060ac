//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Expose a Prometheus-compatible metrics endpoint
//! - Mirror statistics snapshots of the service tree into gauges
//!
//! # Metrics
//! - `service_statistic` (gauge): one series per counter, labelled with
//!   `key` = `<node path>.<counter>` (e.g., `supervisor.httpd.requests`)

use std::collections::HashMap;
use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

pub const STATISTIC_GAUGE: &str = "service_statistic";

/// Install the global recorder and start the scrape listener on `addr`.
///
/// Failure is logged and metrics stay disabled; the daemon keeps running.
pub fn init_metrics(addr: SocketAddr) -> bool {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            tracing::info!(address = %addr, "Metrics endpoint listening");
            true
        }
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter");
            false
        }
    }
}

/// Set one gauge per entry of `snapshot`.
///
/// Without an installed recorder this is a no-op.
pub fn publish(snapshot: &HashMap<String, f64>) {
    for (key, value) in snapshot {
        metrics::gauge!(STATISTIC_GAUGE, "key" => key.clone()).set(*value);
    }
}
