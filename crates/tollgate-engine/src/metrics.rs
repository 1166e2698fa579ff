//! Prometheus metrics for query execution
//!
//! Exposed metrics:
//! - `tollgate_queries_total` - Counter of executed requests by dataset and status
//! - `tollgate_query_duration_seconds` - Histogram of end-to-end request latency
//! - `tollgate_policy_decisions_total` - Counter of policy decisions by policy, decision and mode
//! - `tollgate_missing_condition_total` - Counter of queries refused for a missing tenant predicate

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Counter for executed requests by dataset and status
    pub static ref QUERIES_TOTAL: CounterVec = register_counter_vec!(
        "tollgate_queries_total",
        "Total number of query requests",
        &["dataset", "status"]
    )
    .unwrap();

    /// Histogram for request duration in seconds
    pub static ref QUERY_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "tollgate_query_duration_seconds",
        "Query request latency in seconds",
        &["dataset"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();

    /// Counter for policy decisions; dry-run decisions are counted with mode="dry_run"
    pub static ref POLICY_DECISIONS_TOTAL: CounterVec = register_counter_vec!(
        "tollgate_policy_decisions_total",
        "Total number of allocation policy decisions",
        &["policy", "decision", "mode"]
    )
    .unwrap();

    /// Counter for queries missing a mandatory condition
    pub static ref MISSING_CONDITION_TOTAL: CounterVec = register_counter_vec!(
        "tollgate_missing_condition_total",
        "Total number of queries rejected for a missing mandatory condition",
        &["dataset", "field"]
    )
    .unwrap();
}

pub fn record_query(dataset: &str, status: &str, duration_secs: f64) {
    QUERIES_TOTAL.with_label_values(&[dataset, status]).inc();
    QUERY_DURATION_SECONDS
        .with_label_values(&[dataset])
        .observe(duration_secs);
}

pub fn record_policy_decision(policy: &str, decision: &str, mode: &str) {
    POLICY_DECISIONS_TOTAL
        .with_label_values(&[policy, decision, mode])
        .inc();
}

pub fn record_missing_condition(dataset: &str, field: &str) {
    MISSING_CONDITION_TOTAL
        .with_label_values(&[dataset, field])
        .inc();
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> Result<(String, String), String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;
    let body = String::from_utf8(buffer).map_err(|e| e.to_string())?;
    Ok((encoder.format_type().to_string(), body))
}
