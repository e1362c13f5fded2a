//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_exchanges_total` (counter): inbound exchanges by protocol
//! - `relay_files_served_total` (counter): `send_file` results by outcome
//! - `relay_upstream_connects_total` (counter): upstream connects by outcome
//! - `relay_proxy_errors_total` (counter): reported proxy errors by status

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(address: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(address).install() {
        Ok(()) => tracing::info!(address = %address, "Metrics exporter listening"),
        Err(error) => tracing::error!(address = %address, error = %error, "Failed to install metrics exporter"),
    }
}

pub fn record_exchange(protocol: &'static str) {
    metrics::counter!("relay_exchanges_total", "protocol" => protocol).increment(1);
}

pub fn record_file_served(outcome: &'static str) {
    metrics::counter!("relay_files_served_total", "outcome" => outcome).increment(1);
}

pub fn record_upstream_connect(outcome: &'static str) {
    metrics::counter!("relay_upstream_connects_total", "outcome" => outcome).increment(1);
}

pub fn record_proxy_error(status: u16) {
    metrics::counter!("relay_proxy_errors_total", "status" => status.to_string()).increment(1);
}
