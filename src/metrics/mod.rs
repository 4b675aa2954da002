/*!
 * # Metrics Module
 *
 * Process-wide Prometheus counters for the engine:
 *
 * - Scan outcomes by kind
 * - Return lifecycle transitions
 * - Refund completions
 * - Exchange saga outcomes
 * - Batch item outcomes and retries
 *
 * Counters live in a dedicated registry; `gather_text` renders it in the
 * Prometheus text exposition format.
 */

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref SCANS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fulfillment_scans_total", "Scanned unit codes by outcome"),
        &["outcome"]
    )
    .expect("metric can be created");
    pub static ref RETURN_TRANSITIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("return_transitions_total", "Return lifecycle transitions"),
        &["transition"]
    )
    .expect("metric can be created");
    pub static ref REFUNDS_COMPLETED: IntCounter = IntCounter::new(
        "refunds_completed_total",
        "Total number of refunds completed"
    )
    .expect("metric can be created");
    pub static ref EXCHANGES_COMPLETED: IntCounter = IntCounter::new(
        "exchanges_completed_total",
        "Total number of exchange sagas completed"
    )
    .expect("metric can be created");
    pub static ref EXCHANGES_ABORTED: IntCounter = IntCounter::new(
        "exchanges_aborted_total",
        "Total number of exchange sagas aborted"
    )
    .expect("metric can be created");
    pub static ref BATCH_ITEMS_SUCCEEDED: IntCounter = IntCounter::new(
        "batch_items_succeeded_total",
        "Batch items that completed successfully"
    )
    .expect("metric can be created");
    pub static ref BATCH_ITEMS_FAILED: IntCounter = IntCounter::new(
        "batch_items_failed_total",
        "Batch items that ended in a terminal failure"
    )
    .expect("metric can be created");
    pub static ref BATCH_ITEMS_RETRIED: IntCounter = IntCounter::new(
        "batch_items_retried_total",
        "Retry attempts made by batch jobs"
    )
    .expect("metric can be created");
    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        registry
            .register(Box::new(SCANS_TOTAL.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(RETURN_TRANSITIONS.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(REFUNDS_COMPLETED.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(EXCHANGES_COMPLETED.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(EXCHANGES_ABORTED.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(BATCH_ITEMS_SUCCEEDED.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(BATCH_ITEMS_FAILED.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(BATCH_ITEMS_RETRIED.clone()))
            .expect("metric can be registered");
        registry
    };
}

pub fn record_scan(outcome: &str) {
    SCANS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_return_transition(transition: &str) {
    RETURN_TRANSITIONS.with_label_values(&[transition]).inc();
}

/// Renders every registered metric in the Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gathered_text_contains_engine_counters() {
        record_scan("success");
        record_return_transition("approve");
        BATCH_ITEMS_RETRIED.inc_by(2);

        let text = gather_text();
        assert!(text.contains("fulfillment_scans_total{outcome=\"success\"}"));
        assert!(text.contains("return_transitions_total{transition=\"approve\"}"));
        assert!(text.contains("batch_items_retried_total"));
    }
}
