//! Video summarization worker.
//!
//! This crate provides:
//! - The pipeline state machine (download, extract, transcribe, summarize)
//! - Job executor with bounded concurrency and graceful shutdown
//! - Submission and retry entry points
//! - Best-effort progress and outcome notifications

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod submission;
pub mod workdir;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{Heartbeat, InFlight, InFlightGuard, JobExecutor};
pub use logging::JobLogger;
pub use notify::NotificationEmitter;
pub use pipeline::{
    detect_language, PipelineConfig, PipelineDeps, RunOutcome, Stage, StageResult, VideoPipeline,
    SUMMARY_UNAVAILABLE, UNKNOWN_LANGUAGE,
};
pub use submission::{
    validate_source_url, SubmissionError, SubmissionResult, SubmissionService, MAX_URL_LENGTH,
};
pub use workdir::WorkDir;
