use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

// Prometheus metrics (default registry)
pub static OPERATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "row_store_operations_total",
        "Row store operations by dataset, operation and outcome",
        &["dataset", "op", "outcome"]
    )
    .expect("register operations_total")
});

pub static IDS_ALLOCATED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "row_store_ids_allocated_total",
        "Record ids handed out by create",
        &["dataset"]
    )
    .expect("register ids_allocated_total")
});

pub static SCHEMA_RESETS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "row_store_schema_resets_total",
        "Tables cleared because their header drifted from the schema",
        &["table"]
    )
    .expect("register schema_resets_total")
});

/// Count one finished operation.
pub fn record_operation(dataset: &str, op: &str, outcome: &str) {
    OPERATIONS_TOTAL.with_label_values(&[dataset, op, outcome]).inc();
}

pub fn encode_metrics() -> (axum::http::StatusCode, String) {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encode error: {e}"),
        );
    }
    (
        axum::http::StatusCode::OK,
        String::from_utf8(buffer).unwrap_or_default(),
    )
}
