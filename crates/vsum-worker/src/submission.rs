//! Record submission and retry.
//!
//! The HTTP layer calls into [`SubmissionService`]; everything after dispatch
//! happens on the worker.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use url::Url;
use vsum_media::DetailsFetcher;
use vsum_models::{extract_media_id, RecordId, RecordStatus, RecordUpdate, VideoRecord};
use vsum_queue::{JobDispatcher, ProcessVideoJob, QueueError};
use vsum_store::{RecordStore, StoreError};

/// Maximum accepted source URL length.
pub const MAX_URL_LENGTH: usize = 2048;

pub type SubmissionResult<T> = Result<T, SubmissionError>;

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Record not found: {0}")]
    NotFound(RecordId),

    #[error("Record {id} cannot be retried from status {status}")]
    NotRetryable { id: RecordId, status: RecordStatus },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] QueueError),
}

/// Validate a source URL: non-empty, bounded, http(s) with a host.
pub fn validate_source_url(url: &str) -> SubmissionResult<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(SubmissionError::InvalidUrl("URL cannot be empty".to_string()));
    }
    if url.len() > MAX_URL_LENGTH {
        return Err(SubmissionError::InvalidUrl(format!(
            "URL exceeds maximum length of {} characters",
            MAX_URL_LENGTH
        )));
    }

    let parsed =
        Url::parse(url).map_err(|e| SubmissionError::InvalidUrl(format!("Invalid URL format: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(SubmissionError::InvalidUrl(format!(
                "Invalid protocol '{}'. Only HTTP and HTTPS are allowed.",
                scheme
            )))
        }
    }

    if parsed.host_str().is_none() {
        return Err(SubmissionError::InvalidUrl(
            "URL must have a valid domain".to_string(),
        ));
    }

    Ok(url.to_string())
}

/// Creates records and hands them to the worker.
#[derive(Clone)]
pub struct SubmissionService {
    store: Arc<dyn RecordStore>,
    dispatcher: Arc<dyn JobDispatcher>,
    details: Arc<dyn DetailsFetcher>,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        dispatcher: Arc<dyn JobDispatcher>,
        details: Arc<dyn DetailsFetcher>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            details,
        }
    }

    /// Create a record for `source_url` and dispatch its first run.
    ///
    /// Nothing is persisted for an invalid URL. If dispatch fails after the
    /// record was created, the record is marked `failed_video_processing` so
    /// it can be retried.
    pub async fn submit(&self, source_url: &str, owner_id: &str) -> SubmissionResult<VideoRecord> {
        let url = validate_source_url(source_url)?;
        let media_id =
            extract_media_id(&url).map_err(|e| SubmissionError::InvalidUrl(e.to_string()))?;

        let details = self.details.fetch_details(&url).await;
        let record = VideoRecord::new(owner_id, url, media_id, details);
        self.store.create(&record).await?;

        info!(
            record_id = %record.id,
            media_id = %record.external_media_id,
            "Created record for submission"
        );

        self.dispatch(&record, RecordStatus::FailedVideoProcessing).await?;
        Ok(record)
    }

    /// Re-enter a failed record.
    ///
    /// Records owned by someone else are reported as missing. If the new run
    /// cannot be dispatched the record goes back to its previous failed
    /// status.
    pub async fn retry(&self, record_id: &RecordId, owner_id: &str) -> SubmissionResult<VideoRecord> {
        let record = self
            .store
            .get(record_id)
            .await?
            .filter(|r| r.owner_id == owner_id && !r.is_deleted())
            .ok_or_else(|| SubmissionError::NotFound(record_id.clone()))?;

        if !record.status.is_retryable() {
            return Err(SubmissionError::NotRetryable {
                id: record.id,
                status: record.status,
            });
        }

        if !self.store.reset_for_retry(record_id).await? {
            // Lost a race with another retry; report the status that won.
            let status = self
                .store
                .get(record_id)
                .await?
                .map(|r| r.status)
                .unwrap_or(record.status);
            return Err(SubmissionError::NotRetryable {
                id: record.id,
                status,
            });
        }

        let previous = record.status;
        let mut record = record;
        record.status = RecordStatus::Processing;
        info!(record_id = %record.id, "Record reset for retry");

        self.dispatch(&record, previous).await?;
        Ok(record)
    }

    /// Hand the record to the worker, writing `on_failure` back if that fails.
    async fn dispatch(
        &self,
        record: &VideoRecord,
        on_failure: RecordStatus,
    ) -> SubmissionResult<()> {
        let job = ProcessVideoJob::for_record(record);
        match self.dispatcher.dispatch(job).await {
            Ok(message_id) => {
                info!(record_id = %record.id, "Dispatched run as {}", message_id);
                Ok(())
            }
            Err(e) => {
                warn!(record_id = %record.id, "Dispatch failed: {}", e);
                if let Err(store_err) = self
                    .store
                    .update(&record.id, &RecordUpdate::status(on_failure))
                    .await
                {
                    warn!(
                        record_id = %record.id,
                        "Failed to mark undispatched record: {}", store_err
                    );
                }
                Err(SubmissionError::Dispatch(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};
    use vsum_models::VideoDetails;
    use vsum_queue::QueueResult;
    use vsum_store::InMemoryRecordStore;

    #[derive(Default)]
    struct RecordingDispatcher {
        jobs: Mutex<Vec<ProcessVideoJob>>,
        fail: bool,
    }

    impl RecordingDispatcher {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn jobs(&self) -> Vec<ProcessVideoJob> {
            self.jobs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobDispatcher for RecordingDispatcher {
        async fn dispatch(&self, job: ProcessVideoJob) -> QueueResult<String> {
            if self.fail {
                return Err(QueueError::EnqueueFailed("stream unavailable".to_string()));
            }
            let id = format!("{}-0", self.jobs.lock().unwrap().len() + 1);
            self.jobs.lock().unwrap().push(job);
            Ok(id)
        }
    }

    struct StaticDetails;

    #[async_trait]
    impl DetailsFetcher for StaticDetails {
        async fn fetch_details(&self, _url: &str) -> VideoDetails {
            VideoDetails {
                title: Some("A talk".to_string()),
                ..Default::default()
            }
        }
    }

    const URL: &str = "https://platform.example/watch?v=ABCDEFGHIJK";

    fn service(
        store: Arc<InMemoryRecordStore>,
        dispatcher: Arc<RecordingDispatcher>,
    ) -> SubmissionService {
        SubmissionService::new(store, dispatcher, Arc::new(StaticDetails))
    }

    #[test]
    fn test_validate_source_url() {
        assert_eq!(assert_ok!(validate_source_url(&format!("  {URL} "))), URL);
        assert_err!(validate_source_url("  "));
        assert_err!(validate_source_url("not a url"));
        assert_err!(validate_source_url("ftp://platform.example/watch?v=ABCDEFGHIJK"));

        let long = format!("https://platform.example/{}", "a".repeat(MAX_URL_LENGTH));
        assert_err!(validate_source_url(&long));
    }

    #[tokio::test]
    async fn test_submit_creates_and_dispatches() {
        let store = Arc::new(InMemoryRecordStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let svc = service(store.clone(), dispatcher.clone());

        let record = svc.submit(URL, "owner-1").await.unwrap();

        assert_eq!(record.external_media_id, "ABCDEFGHIJK");
        assert_eq!(record.status, RecordStatus::Processing);
        assert_eq!(record.title(), Some("A talk"));

        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.owner_id, "owner-1");

        let jobs = dispatcher.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].record_id, record.id);
        assert_eq!(jobs[0].owner_id, "owner-1");
    }

    #[tokio::test]
    async fn test_submit_invalid_url_persists_nothing() {
        let store = Arc::new(InMemoryRecordStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let svc = service(store.clone(), dispatcher.clone());

        let err = svc
            .submit("https://platform.example/watch", "owner-1")
            .await
            .unwrap_err();

        assert!(matches!(err, SubmissionError::InvalidUrl(_)));
        assert!(store.is_empty().await);
        assert!(dispatcher.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_failure_leaves_record_retryable() {
        let store = Arc::new(InMemoryRecordStore::new());
        let svc = service(store.clone(), Arc::new(RecordingDispatcher::failing()));

        let err = svc.submit(URL, "owner-1").await.unwrap_err();
        assert!(matches!(err, SubmissionError::Dispatch(_)));

        let records = store.all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, RecordStatus::FailedVideoProcessing);
    }

    #[tokio::test]
    async fn test_retry_failed_record() {
        let store = Arc::new(InMemoryRecordStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let svc = service(store.clone(), dispatcher.clone());

        let record = svc.submit(URL, "owner-1").await.unwrap();
        store
            .update(
                &record.id,
                &RecordUpdate::status(RecordStatus::FailedAudioProcessing),
            )
            .await
            .unwrap();

        let retried = svc.retry(&record.id, "owner-1").await.unwrap();
        assert_eq!(retried.status, RecordStatus::Processing);
        assert_eq!(retried.external_media_id, record.external_media_id);

        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecordStatus::Processing);
        assert_eq!(dispatcher.jobs().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_dispatch_failure_keeps_failed_stage() {
        let store = Arc::new(InMemoryRecordStore::new());
        let svc = service(store.clone(), Arc::new(RecordingDispatcher::default()));
        let record = svc.submit(URL, "owner-1").await.unwrap();
        store
            .update(
                &record.id,
                &RecordUpdate::status(RecordStatus::FailedAudioProcessing),
            )
            .await
            .unwrap();

        let failing = service(store.clone(), Arc::new(RecordingDispatcher::failing()));
        let err = failing.retry(&record.id, "owner-1").await.unwrap_err();
        assert!(matches!(err, SubmissionError::Dispatch(_)));

        let stored = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecordStatus::FailedAudioProcessing);

        // Still retryable once dispatch recovers.
        let retried = assert_ok!(svc.retry(&record.id, "owner-1").await);
        assert_eq!(retried.status, RecordStatus::Processing);
    }

    #[tokio::test]
    async fn test_retry_rejects_non_failed_record() {
        let store = Arc::new(InMemoryRecordStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let svc = service(store.clone(), dispatcher.clone());

        let record = svc.submit(URL, "owner-1").await.unwrap();

        let err = svc.retry(&record.id, "owner-1").await.unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::NotRetryable {
                status: RecordStatus::Processing,
                ..
            }
        ));
        assert_eq!(dispatcher.jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_is_owner_scoped() {
        let store = Arc::new(InMemoryRecordStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let svc = service(store.clone(), dispatcher.clone());

        let record = svc.submit(URL, "owner-1").await.unwrap();
        store
            .update(
                &record.id,
                &RecordUpdate::status(RecordStatus::FailedTranscription),
            )
            .await
            .unwrap();

        let err = svc.retry(&record.id, "someone-else").await.unwrap_err();
        assert!(matches!(err, SubmissionError::NotFound(_)));

        let err = svc
            .retry(&RecordId::from("missing"), "owner-1")
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::NotFound(_)));
    }
}
