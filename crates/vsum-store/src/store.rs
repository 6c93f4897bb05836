//! Record store contract.

use async_trait::async_trait;
use vsum_models::{RecordId, RecordUpdate, VideoRecord};

use crate::error::StoreResult;

/// Persistence for video records.
///
/// Updates are partial: only fields present in a [`RecordUpdate`] are
/// written. Status transitions into `processing` for an existing record go
/// through [`RecordStore::reset_for_retry`], which is a compare-and-set.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record. Fails if the id is taken.
    async fn create(&self, record: &VideoRecord) -> StoreResult<()>;

    /// Fetch a record by id.
    async fn get(&self, id: &RecordId) -> StoreResult<Option<VideoRecord>>;

    /// Apply a partial update. Fails with `NotFound` for unknown ids.
    async fn update(&self, id: &RecordId, update: &RecordUpdate) -> StoreResult<()>;

    /// Move a failed record back to `processing`.
    ///
    /// Returns `Ok(false)` when the record exists but is not in a failed
    /// status; nothing is changed in that case.
    async fn reset_for_retry(&self, id: &RecordId) -> StoreResult<bool>;
}
