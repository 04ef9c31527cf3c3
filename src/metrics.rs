//! Prometheus metrics for the event tracking engine
//!
//! Counters and histograms are registered in the default registry on first
//! use; `gather_metrics` renders them in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec, Encoder,
    HistogramVec, TextEncoder,
};

use crate::error::{Error, Result};

lazy_static! {
    /// Bit writes by operation (track, untrack)
    pub static ref BIT_WRITES_TOTAL: CounterVec = register_counter_vec!(
        "bitevents_bit_writes_total",
        "Bits written into interval bitmaps",
        &["op"]
    ).expect("metric bitevents_bit_writes_total registers once");

    /// Read queries by kind (count, membership, range)
    pub static ref QUERIES_TOTAL: CounterVec = register_counter_vec!(
        "bitevents_queries_total",
        "Aggregation queries served",
        &["kind"]
    ).expect("metric bitevents_queries_total registers once");

    /// Identifier resolutions by outcome (hit, allocated, race_lost, unknown)
    pub static ref INTERN_TOTAL: CounterVec = register_counter_vec!(
        "bitevents_intern_total",
        "Identifier resolutions by outcome",
        &["outcome"]
    ).expect("metric bitevents_intern_total registers once");

    /// Keys skipped by the catalog scanner because they did not decode
    pub static ref CATALOG_SKIPPED_KEYS: Counter = register_counter!(
        "bitevents_catalog_skipped_keys_total",
        "Keys under the event prefix that failed to decode"
    ).expect("metric bitevents_catalog_skipped_keys_total registers once");

    /// Errors by type and operation
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "bitevents_errors_total",
        "Errors returned to callers",
        &["error_type", "operation"]
    ).expect("metric bitevents_errors_total registers once");

    /// Operation latency
    pub static ref OPERATION_DURATION: HistogramVec = register_histogram_vec!(
        "bitevents_operation_duration_seconds",
        "Engine operation latency in seconds",
        &["operation"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    ).expect("metric bitevents_operation_duration_seconds registers once");
}

/// Record a bit write
pub fn record_bit_write(op: &str) {
    BIT_WRITES_TOTAL.with_label_values(&[op]).inc();
}

/// Record a served query
pub fn record_query(kind: &str) {
    QUERIES_TOTAL.with_label_values(&[kind]).inc();
}

/// Record an identifier resolution outcome
pub fn record_intern(outcome: &str) {
    INTERN_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a key skipped during a catalog scan
pub fn record_skipped_key() {
    CATALOG_SKIPPED_KEYS.inc();
}

/// Record an error returned from an operation
pub fn record_error(err: &Error, operation: &str) {
    ERRORS_TOTAL
        .with_label_values(&[err.kind(), operation])
        .inc();
}

/// Record how long an operation took
pub fn observe_duration(operation: &str, duration_secs: f64) {
    OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .map_err(|e| Error::Configuration(format!("failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| Error::Configuration(format!("metrics are not UTF-8: {}", e)))
}
