//! Structured run logging.
//!
//! Lifecycle logs carry `record_id`, `job_id` and `operation` fields so a
//! single run can be followed across stages.

use tracing::{error, info, warn, Span};
use vsum_models::{JobId, RecordId};

/// Run logger with consistent structured fields.
#[derive(Debug, Clone)]
pub struct JobLogger {
    record_id: String,
    job_id: Option<String>,
    operation: String,
}

impl JobLogger {
    /// Create a logger for a record and operation.
    pub fn new(record_id: &RecordId, operation: &str) -> Self {
        Self {
            record_id: record_id.to_string(),
            job_id: None,
            operation: operation.to_string(),
        }
    }

    /// Attach the dispatching job's id.
    pub fn with_job(mut self, job_id: &JobId) -> Self {
        self.job_id = Some(job_id.to_string());
        self
    }

    fn job_field(&self) -> &str {
        self.job_id.as_deref().unwrap_or("-")
    }

    pub fn log_start(&self, message: &str) {
        info!(
            record_id = %self.record_id,
            job_id = %self.job_field(),
            operation = %self.operation,
            "Run started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            record_id = %self.record_id,
            job_id = %self.job_field(),
            operation = %self.operation,
            "Run progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            record_id = %self.record_id,
            job_id = %self.job_field(),
            operation = %self.operation,
            "Run warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            record_id = %self.record_id,
            job_id = %self.job_field(),
            operation = %self.operation,
            "Run error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            record_id = %self.record_id,
            job_id = %self.job_field(),
            operation = %self.operation,
            "Run completed: {}", message
        );
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span covering the whole run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "run",
            record_id = %self.record_id,
            job_id = %self.job_field(),
            operation = %self.operation
        )
    }
}
