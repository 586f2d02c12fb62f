//! Prometheus metrics for the content graph.
//!
//! Collectors register in the default registry; an embedding service exposes
//! them through its own `/metrics` endpoint.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};

/// Committed like/unlike operations per ledger
static LIKES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "content_graph_likes_total",
        "Committed like ledger mutations",
        &["target", "action"]
    )
    .expect("failed to register content_graph_likes_total")
});

/// Rows removed by committed cascades
static CASCADE_ROWS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "content_graph_cascade_rows_total",
        "Rows removed by committed delete cascades",
        &["kind"]
    )
    .expect("failed to register content_graph_cascade_rows_total")
});

/// Business-rule rejections
static REJECTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "content_graph_rejections_total",
        "Operations rejected by a business rule",
        &["reason"]
    )
    .expect("failed to register content_graph_rejections_total")
});

pub fn record_like(target: &str, action: &str) {
    LIKES_TOTAL.with_label_values(&[target, action]).inc();
}

pub fn record_cascade_rows(kind: &str, count: u64) {
    if count > 0 {
        CASCADE_ROWS_TOTAL.with_label_values(&[kind]).inc_by(count);
    }
}

pub fn record_rejection(reason: &str) {
    REJECTIONS_TOTAL.with_label_values(&[reason]).inc();
}
