//! Metrics for observability.
//!
//! Emits through the `metrics` facade; installing an exporter is the host's
//! job. Covers:
//! - Per-message outcomes by direction and topic
//! - Send attempts, retries and latency
//! - Topology discovery
//! - Cycle duration and engine state
//! - Circuit breaker activity
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replication_`:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track durations in seconds
//!
//! # Usage
//!
//! ```rust,no_run
//! use replication_relay::metrics;
//! use std::time::Duration;
//!
//! metrics::record_message_outcome("primary_to_secondary", "orders", "replicated");
//! metrics::record_send_latency("orders", Duration::from_millis(12));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Message Metrics
// =============================================================================

/// Record the terminal outcome of one message (`replicated`, `skipped`, `failed`).
pub fn record_message_outcome(direction: &str, topic: &str, outcome: &str) {
    counter!(
        "replication_messages_total",
        "direction" => direction.to_string(),
        "topic" => topic.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record replicated payload size.
pub fn record_message_bytes(direction: &str, bytes: usize) {
    histogram!("replication_message_bytes", "direction" => direction.to_string())
        .record(bytes as f64);
}

/// Record a source settlement (`complete` or `abandon`) and whether it succeeded.
pub fn record_settlement(action: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "replication_settlements_total",
        "action" => action.to_string(),
        "status" => status
    )
    .increment(1);
}

// =============================================================================
// Delivery Metrics
// =============================================================================

pub fn record_send_attempt(destination: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "replication_send_attempts_total",
        "destination" => destination.to_string(),
        "status" => status
    )
    .increment(1);
}

pub fn record_send_latency(destination: &str, duration: Duration) {
    histogram!("replication_send_latency_seconds", "destination" => destination.to_string())
        .record(duration.as_secs_f64());
}

/// Record a scheduled retry after a transient failure.
pub fn record_retry(error_type: &str) {
    counter!("replication_retries_total", "error_type" => error_type.to_string()).increment(1);
}

pub fn record_retries_exhausted(error_type: &str) {
    counter!(
        "replication_retries_exhausted_total",
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a classified failure by type tag and severity.
pub fn record_error(error_type: &str, severity: &str) {
    counter!(
        "replication_errors_total",
        "error_type" => error_type.to_string(),
        "severity" => severity.to_string()
    )
    .increment(1);
}

// =============================================================================
// Topology and Cycle Metrics
// =============================================================================

pub fn record_discovery(namespace: &str, topics: usize, subscriptions: usize) {
    let ns = namespace.to_string();
    counter!("replication_discoveries_total", "namespace" => ns.clone(), "status" => "success")
        .increment(1);
    gauge!("replication_discovered_topics", "namespace" => ns.clone()).set(topics as f64);
    gauge!("replication_discovered_subscriptions", "namespace" => ns).set(subscriptions as f64);
}

pub fn record_discovery_failure(namespace: &str) {
    counter!(
        "replication_discoveries_total",
        "namespace" => namespace.to_string(),
        "status" => "failure"
    )
    .increment(1);
}

/// Record a finished cycle and whether it hit any failure.
pub fn record_cycle(duration: Duration, processed: u64, failed: bool) {
    let status = if failed { "failure" } else { "success" };
    counter!("replication_cycles_total", "status" => status).increment(1);
    histogram!("replication_cycle_duration_seconds").record(duration.as_secs_f64());
    histogram!("replication_cycle_messages").record(processed as f64);
}

pub fn set_active_workers(count: usize) {
    gauge!("replication_active_workers").set(count as f64);
}

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    // Numeric for alerting
    let value = match state {
        "Created" => 0.0,
        "Running" => 1.0,
        "Waiting" => 2.0,
        "ShuttingDown" => 3.0,
        "Stopped" => 4.0,
        "Failed" => 5.0,
        _ => -1.0,
    };
    gauge!("replication_engine_state").set(value);
}

// =============================================================================
// Circuit Breaker Metrics
// =============================================================================

pub fn record_circuit_call(circuit_name: &str, outcome: &str) {
    counter!(
        "replication_circuit_calls_total",
        "circuit" => circuit_name.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record circuit breaker rejection (circuit was open).
pub fn record_circuit_rejection(circuit_name: &str) {
    counter!(
        "replication_circuit_rejections_total",
        "circuit" => circuit_name.to_string()
    )
    .increment(1);
}
