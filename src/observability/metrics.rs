//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (sessions, faults, relayed bytes)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `proxy_sessions_total` (counter): accepted sessions
//! - `proxy_sessions_active` (gauge): sessions currently proxied
//! - `proxy_faults_total` (counter): sessions ended by a fault
//! - `proxy_relayed_bytes_total` (counter): bytes read, by leg
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Exporter failure is logged, never fatal; the proxy runs without it

use std::net::SocketAddr;

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter and register metric descriptions.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_counter!("proxy_sessions_total", "Accepted proxy sessions");
            describe_gauge!("proxy_sessions_active", "Sessions currently proxied");
            describe_counter!("proxy_faults_total", "Sessions ended by a fault");
            describe_counter!(
                "proxy_relayed_bytes_total",
                "Bytes read from either leg, labeled by leg"
            );
            tracing::info!(address = %addr, "Metrics exporter started");
        }
        Err(err) => {
            tracing::error!(%err, "Failed to start metrics exporter");
        }
    }
}
