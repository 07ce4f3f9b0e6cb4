//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, rebuilds, generations)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, route
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_rebuilds_total` (counter): rebuilds by outcome
//! - `proxy_fragment_errors_total` (counter): rejected service fragments
//! - `proxy_active_generation` (gauge): id of the live route table
//! - `proxy_draining_generations` (gauge): superseded tables still draining
//! - `proxy_provider_events_total` (counter): provider signals by provider
//!
//! # Design Decisions
//! - Updates go through the `metrics` facade and are no-ops until a
//!   recorder is installed

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record one proxied request.
pub fn record_request(method: &str, status: u16, route: &str, start: Instant) {
    metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "route" => route.to_string()
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record the outcome of one rebuild (`published`, `unchanged`, `rejected`).
pub fn record_rebuild(outcome: &'static str, fragment_errors: usize) {
    metrics::counter!("proxy_rebuilds_total", "outcome" => outcome).increment(1);
    if fragment_errors > 0 {
        metrics::counter!("proxy_fragment_errors_total").increment(fragment_errors as u64);
    }
}

pub fn set_active_generation(id: u64) {
    metrics::gauge!("proxy_active_generation").set(id as f64);
}

pub fn set_draining_generations(count: usize) {
    metrics::gauge!("proxy_draining_generations").set(count as f64);
}
