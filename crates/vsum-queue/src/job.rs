//! Job types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vsum_models::{JobId, RecordId, VideoRecord};

/// Job to run the summarization pipeline for one record.
///
/// The job carries identifiers only; the worker loads the record itself so a
/// retry always sees the current stored state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessVideoJob {
    /// Unique job ID
    pub job_id: JobId,
    /// Record to process
    pub record_id: RecordId,
    /// Owner, for notification scoping
    pub owner_id: String,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl ProcessVideoJob {
    pub fn new(record_id: RecordId, owner_id: impl Into<String>) -> Self {
        Self {
            job_id: JobId::new(),
            record_id,
            owner_id: owner_id.into(),
            created_at: Utc::now(),
        }
    }

    /// Job for an existing record.
    pub fn for_record(record: &VideoRecord) -> Self {
        Self::new(record.id.clone(), record.owner_id.clone())
    }

    /// Generate idempotency key for deduplication.
    ///
    /// Keyed by record, not by job, so two dispatches for one record collide.
    pub fn idempotency_key(&self) -> String {
        format!("process:{}", self.record_id)
    }
}
