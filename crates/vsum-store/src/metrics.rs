//! Record store metrics.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Total store operations by operation and outcome.
    pub const OPERATIONS_TOTAL: &str = "record_store_operations_total";

    /// Operation latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "record_store_latency_seconds";

    /// Retry resets rejected because the record was not in a failed status.
    pub const RETRY_REJECTED_TOTAL: &str = "record_store_retry_rejected_total";
}

/// Record metrics for a completed store operation.
pub fn record_operation(operation: &'static str, ok: bool, latency_ms: f64) {
    counter!(
        names::OPERATIONS_TOTAL,
        "operation" => operation,
        "outcome" => if ok { "ok" } else { "error" }
    )
    .increment(1);

    histogram!(names::LATENCY_SECONDS, "operation" => operation).record(latency_ms / 1000.0);
}

/// Record a rejected retry reset.
pub fn record_retry_rejected() {
    counter!(names::RETRY_REJECTED_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::OPERATIONS_TOTAL.starts_with("record_store_"));
        assert!(names::LATENCY_SECONDS.contains("latency"));
    }
}
