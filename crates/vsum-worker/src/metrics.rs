//! Worker metrics.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const RUNS_STARTED_TOTAL: &str = "vsum_runs_started_total";
    pub const RUNS_FINISHED_TOTAL: &str = "vsum_runs_finished_total";
    pub const STAGE_DURATION_SECONDS: &str = "vsum_stage_duration_seconds";
    pub const SUMMARY_DEGRADED_TOTAL: &str = "vsum_summary_degraded_total";
    pub const NOTIFY_FAILURES_TOTAL: &str = "vsum_notification_failures_total";
    pub const DUPLICATE_DELIVERIES_TOTAL: &str = "vsum_duplicate_deliveries_total";
}

/// Install the Prometheus exporter with an HTTP listener on `port`.
pub fn install_exporter(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

pub fn record_run_started() {
    counter!(names::RUNS_STARTED_TOTAL).increment(1);
}

/// Record a finished run by final status.
pub fn record_run_finished(status: &'static str) {
    counter!(names::RUNS_FINISHED_TOTAL, "status" => status).increment(1);
}

pub fn record_stage_duration(stage: &'static str, ok: bool, secs: f64) {
    histogram!(
        names::STAGE_DURATION_SECONDS,
        "stage" => stage,
        "outcome" => if ok { "ok" } else { "failed" }
    )
    .record(secs);
}

pub fn record_summary_degraded(reason: &'static str) {
    counter!(names::SUMMARY_DEGRADED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_notify_failure(kind: &'static str) {
    counter!(names::NOTIFY_FAILURES_TOTAL, "kind" => kind).increment(1);
}

pub fn record_duplicate_delivery() {
    counter!(names::DUPLICATE_DELIVERIES_TOTAL).increment(1);
}
