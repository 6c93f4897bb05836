//! In-process record store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use vsum_models::{RecordId, RecordStatus, RecordUpdate, VideoRecord};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_retry_rejected;
use crate::store::RecordStore;

/// [`RecordStore`] kept in a map behind a lock. Used by tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<RecordId, VideoRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Snapshot of every stored record, oldest first.
    pub async fn all(&self) -> Vec<VideoRecord> {
        let mut records: Vec<VideoRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create(&self, record: &VideoRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id.to_string()));
        }
        records.insert(record.id.clone(), record.clone());
        debug!(record_id = %record.id, "Created record");
        Ok(())
    }

    async fn get(&self, id: &RecordId) -> StoreResult<Option<VideoRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn update(&self, id: &RecordId, update: &RecordUpdate) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(id.as_str()))?;
        update.apply_to(record);
        Ok(())
    }

    async fn reset_for_retry(&self, id: &RecordId) -> StoreResult<bool> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(id.as_str()))?;

        if !record.status.is_retryable() {
            record_retry_rejected();
            return Ok(false);
        }

        record.status = RecordStatus::Processing;
        record.transcription = None;
        record.summary = None;
        record.detected_language = None;
        record.updated_at = Utc::now();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsum_models::VideoDetails;

    fn record() -> VideoRecord {
        VideoRecord::new(
            "user-1",
            "https://platform.example/watch?v=ABCDEFGHIJK",
            "ABCDEFGHIJK",
            VideoDetails::default(),
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryRecordStore::new();
        let record = record();

        store.create(&record).await.unwrap();
        let loaded = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded, record);

        let err = store.create(&record).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_partial_update() {
        let store = InMemoryRecordStore::new();
        let record = record();
        store.create(&record).await.unwrap();

        store
            .update(&record.id, &RecordUpdate::completed("text", "summary", "English"))
            .await
            .unwrap();

        let loaded = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RecordStatus::Completed);
        assert_eq!(loaded.transcription.as_deref(), Some("text"));
        assert_eq!(loaded.owner_id, "user-1");
        assert_eq!(loaded.chat_session_id, record.chat_session_id);
    }

    #[tokio::test]
    async fn test_update_unknown_record() {
        let store = InMemoryRecordStore::new();
        let err = store
            .update(&RecordId::from("missing"), &RecordUpdate::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_reset_for_retry_only_from_failed() {
        let store = InMemoryRecordStore::new();
        let record = record();
        store.create(&record).await.unwrap();

        // processing is not retryable
        assert!(!store.reset_for_retry(&record.id).await.unwrap());

        store
            .update(&record.id, &RecordUpdate::status(RecordStatus::FailedAudioProcessing))
            .await
            .unwrap();
        assert!(store.reset_for_retry(&record.id).await.unwrap());

        let loaded = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RecordStatus::Processing);
        assert_eq!(loaded.external_media_id, "ABCDEFGHIJK");

        // second reset sees processing and is rejected
        assert!(!store.reset_for_retry(&record.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_completed_is_not_retryable() {
        let store = InMemoryRecordStore::new();
        let record = record();
        store.create(&record).await.unwrap();
        store
            .update(&record.id, &RecordUpdate::completed("t", "s", "en"))
            .await
            .unwrap();

        assert!(!store.reset_for_retry(&record.id).await.unwrap());
    }
}
