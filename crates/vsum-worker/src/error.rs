//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Working directory error: {0}")]
    WorkDir(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Stage panicked: {0}")]
    Panicked(String),

    #[error("Store error: {0}")]
    Store(#[from] vsum_store::StoreError),

    #[error("Media error: {0}")]
    Media(#[from] vsum_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] vsum_queue::QueueError),

    #[error("Summarizer error: {0}")]
    Llm(#[from] vsum_llm_client::LlmError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn work_dir(msg: impl Into<String>) -> Self {
        Self::WorkDir(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
