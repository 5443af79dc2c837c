//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (connections, cache outcomes, upstream errors, latency)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `proxy_connections_total` (counter): accepted client connections
//! - `proxy_active_connections` (gauge): current connection count
//! - `proxy_requests_total` (counter): completed cycles by response source
//! - `proxy_cache_lookups_total` (counter): lookups by result
//! - `proxy_cache_stores_total` (counter): responses written to the cache
//! - `proxy_cache_entries` (gauge): entries held, stale included
//! - `proxy_upstream_errors_total` (counter): forwarding failures by kind
//! - `proxy_parse_errors_total` (counter): invalid messages by side
//! - `proxy_compressed_responses_total` (counter)
//! - `proxy_request_duration_seconds` (histogram): request complete → response written
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels are low-cardinality enums only

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_opened() {
    metrics::counter!("proxy_connections_total").increment(1);
    metrics::gauge!("proxy_active_connections").increment(1.0);
}

pub fn record_connection_closed() {
    metrics::gauge!("proxy_active_connections").decrement(1.0);
}

/// `source` is `"cache"` or `"upstream"`.
pub fn record_request(source: &'static str, status: u16, start: Instant) {
    metrics::counter!("proxy_requests_total", "source" => source, "status" => status.to_string())
        .increment(1);
    metrics::histogram!("proxy_request_duration_seconds", "source" => source)
        .record(start.elapsed().as_secs_f64());
}

/// `result` is `"hit"`, `"miss"` or `"stale_encoding"`.
pub fn record_cache_lookup(result: &'static str) {
    metrics::counter!("proxy_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_store(entries: usize) {
    metrics::counter!("proxy_cache_stores_total").increment(1);
    metrics::gauge!("proxy_cache_entries").set(entries as f64);
}

pub fn record_upstream_error(kind: &'static str) {
    metrics::counter!("proxy_upstream_errors_total", "kind" => kind).increment(1);
}

/// `side` is `"request"` or `"response"`.
pub fn record_parse_error(side: &'static str) {
    metrics::counter!("proxy_parse_errors_total", "side" => side).increment(1);
}

pub fn record_compressed() {
    metrics::counter!("proxy_compressed_responses_total").increment(1);
}
