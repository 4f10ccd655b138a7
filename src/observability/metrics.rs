//! Metrics collection and exposition.
//!
//! # Metrics
//! - `aggregator_upstream_requests_total` (counter): network attempts by upstream, outcome
//! - `aggregator_upstream_duration_seconds` (histogram): per-attempt latency by upstream
//! - `aggregator_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `aggregator_cache_hits_total` / `aggregator_cache_misses_total` (counter): by upstream
//! - `aggregator_cache_evictions_total` (counter), `aggregator_cache_size` (gauge)
//! - `aggregator_retries_total` (counter): by retry context
//! - `aggregator_rate_limit_wait_seconds` (histogram): slot + token wait by class
//! - `aggregator_offload_queue_depth` (gauge): jobs waiting for a worker
//! - `aggregator_aggregations_total` (counter): by strategy, outcome
//!
//! Recording is a no-op until a recorder is installed with [`init_metrics`].

use std::net::SocketAddr;
use std::time::Duration;

use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitState;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "failed to install metrics exporter"),
    }
}

pub fn record_upstream_request(upstream: &str, outcome: &'static str) {
    counter!(
        "aggregator_upstream_requests_total",
        "upstream" => upstream.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_upstream_duration(upstream: &str, elapsed: Duration) {
    histogram!("aggregator_upstream_duration_seconds", "upstream" => upstream.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_circuit_state(upstream: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("aggregator_circuit_state", "upstream" => upstream.to_string()).set(value);
}

pub fn record_cache_hit(upstream: &str) {
    counter!("aggregator_cache_hits_total", "upstream" => upstream.to_string()).increment(1);
}

pub fn record_cache_miss(upstream: &str) {
    counter!("aggregator_cache_misses_total", "upstream" => upstream.to_string()).increment(1);
}

pub fn record_cache_eviction() {
    counter!("aggregator_cache_evictions_total").increment(1);
}

pub fn record_cache_size(size: usize) {
    gauge!("aggregator_cache_size").set(size as f64);
}

pub fn record_retry(context: &str) {
    counter!("aggregator_retries_total", "context" => context.to_string()).increment(1);
}

pub fn record_rate_limit_wait(class: &str, waited: Duration) {
    histogram!("aggregator_rate_limit_wait_seconds", "class" => class.to_string())
        .record(waited.as_secs_f64());
}

pub fn record_offload_queue_depth(depth: usize) {
    gauge!("aggregator_offload_queue_depth").set(depth as f64);
}

pub fn record_aggregation(strategy: &str, outcome: &'static str) {
    counter!(
        "aggregator_aggregations_total",
        "strategy" => strategy.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
