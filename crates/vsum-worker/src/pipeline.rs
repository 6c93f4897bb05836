//! Summarization pipeline.
//!
//! One run takes a record from `processing` to exactly one terminal status:
//!
//! ```text
//! Start -> Downloading -> Extracting -> Transcribing -> Summarizing -> Completed
//!              |              |             |
//!              v              v             v
//!     failed_video_     failed_audio_   failed_
//!     processing        processing      transcription
//! ```
//!
//! Summarization never fails a run; a degraded summary is replaced by
//! [`SUMMARY_UNAVAILABLE`]. Anything unexpected (store errors, working
//! directory errors, panics inside a stage) is caught at the top of the run
//! and mapped to the failure status of the stage in progress.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use futures::FutureExt;
use regex::Regex;
use tracing::Instrument;
use vsum_llm_client::Summarizer;
use vsum_media::{
    file_has_content, AudioExtractor, MediaFetcher, MediaResult, StageOutput, Transcriber,
    Transcript,
};
use vsum_models::{JobId, RecordId, RecordStatus, RecordUpdate, VideoRecord};
use vsum_queue::Notifier;
use vsum_store::RecordStore;

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::notify::NotificationEmitter;
use crate::workdir::WorkDir;

/// Stored and published when summarization degrades.
pub const SUMMARY_UNAVAILABLE: &str = "summary unavailable";

/// Language recorded when the transcriber does not report one.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// Pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub work_root: PathBuf,
    pub download_timeout: Duration,
    pub extract_timeout: Duration,
    pub transcribe_timeout: Duration,
    pub summary_timeout: Duration,
    pub notify_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from("/tmp/vsum"),
            download_timeout: Duration::from_secs(3000),
            extract_timeout: Duration::from_secs(3000),
            transcribe_timeout: Duration::from_secs(3000),
            summary_timeout: Duration::from_secs(120),
            notify_timeout: Duration::from_millis(2000),
        }
    }
}

/// Pipeline stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Stage {
    Download = 0,
    Extract = 1,
    Transcribe = 2,
    Summarize = 3,
    Finalize = 4,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Extract => "extract",
            Stage::Transcribe => "transcribe",
            Stage::Summarize => "summarize",
            Stage::Finalize => "finalize",
        }
    }

    /// Status recorded when the run stops in this stage.
    ///
    /// Summarize and finalize have no status of their own and map to the
    /// nearest preceding stage.
    pub fn failure_status(&self) -> RecordStatus {
        match self {
            Stage::Download => RecordStatus::FailedVideoProcessing,
            Stage::Extract => RecordStatus::FailedAudioProcessing,
            Stage::Transcribe | Stage::Summarize | Stage::Finalize => {
                RecordStatus::FailedTranscription
            }
        }
    }

    /// Fixed reason reported when the stage produces no valid artifact.
    pub fn failure_reason(&self) -> Option<&'static str> {
        match self {
            Stage::Download => Some("download failed"),
            Stage::Extract => Some("audio extraction failed"),
            Stage::Transcribe => Some("transcription failed"),
            Stage::Summarize | Stage::Finalize => None,
        }
    }

    /// Progress published when the stage is done (summarize: when it starts).
    pub fn progress(&self) -> u8 {
        match self {
            Stage::Download => 20,
            Stage::Extract => 40,
            Stage::Transcribe => 60,
            Stage::Summarize => 80,
            Stage::Finalize => 100,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Stage::Download,
            1 => Stage::Extract,
            2 => Stage::Transcribe,
            3 => Stage::Summarize,
            _ => Stage::Finalize,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage currently executing; read by the fault handler after an unwind.
#[derive(Debug)]
struct StageCursor(AtomicU8);

impl StageCursor {
    fn new() -> Self {
        Self(AtomicU8::new(Stage::Download as u8))
    }

    fn enter(&self, stage: Stage) {
        self.0.store(stage as u8, Ordering::SeqCst);
    }

    fn current(&self) -> Stage {
        Stage::from_u8(self.0.load(Ordering::SeqCst))
    }
}

/// Result of a stage that can stop the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageResult<T> {
    Succeeded(T),
    Failed { detail: String },
}

impl<T> StageResult<T> {
    fn failed(detail: impl Into<String>) -> Self {
        StageResult::Failed {
            detail: detail.into(),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Record is `completed`; the summary may be the sentinel.
    Completed { summary_degraded: bool },
    /// Record is in a failure status.
    Failed { status: RecordStatus, reason: String },
    /// Record was not in `processing`; nothing was done.
    Skipped { status: RecordStatus },
}

impl RunOutcome {
    /// Status label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed { .. } => RecordStatus::Completed.as_str(),
            RunOutcome::Failed { status, .. } => status.as_str(),
            RunOutcome::Skipped { .. } => "skipped",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }
}

/// Collaborators the pipeline drives.
#[derive(Clone)]
pub struct PipelineDeps {
    pub fetcher: Arc<dyn MediaFetcher>,
    pub extractor: Arc<dyn AudioExtractor>,
    pub transcriber: Arc<dyn Transcriber>,
    pub summarizer: Arc<dyn Summarizer>,
    pub store: Arc<dyn RecordStore>,
    pub notifier: Arc<dyn Notifier>,
}

/// The pipeline state machine.
pub struct VideoPipeline {
    fetcher: Arc<dyn MediaFetcher>,
    extractor: Arc<dyn AudioExtractor>,
    transcriber: Arc<dyn Transcriber>,
    summarizer: Arc<dyn Summarizer>,
    store: Arc<dyn RecordStore>,
    emitter: NotificationEmitter,
    config: PipelineConfig,
}

impl VideoPipeline {
    pub fn new(deps: PipelineDeps, config: PipelineConfig) -> Self {
        let emitter = NotificationEmitter::new(deps.notifier, config.notify_timeout);
        Self {
            fetcher: deps.fetcher,
            extractor: deps.extractor,
            transcriber: deps.transcriber,
            summarizer: deps.summarizer,
            store: deps.store,
            emitter,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load a record and run it.
    ///
    /// Records that are not in `processing` are skipped, so a redelivered job
    /// never reruns a finished record.
    pub async fn run(&self, record_id: &RecordId, job_id: Option<&JobId>) -> WorkerResult<RunOutcome> {
        let record = self
            .store
            .get(record_id)
            .await?
            .ok_or_else(|| WorkerError::RecordNotFound(record_id.to_string()))?;

        if record.status != RecordStatus::Processing {
            tracing::info!(
                record_id = %record_id,
                status = %record.status,
                "Record is not processing, skipping run"
            );
            return Ok(RunOutcome::Skipped {
                status: record.status,
            });
        }

        let mut logger = JobLogger::new(record_id, "summarize_video");
        if let Some(job_id) = job_id {
            logger = logger.with_job(job_id);
        }

        Ok(self.run_record(&record, &logger).await)
    }

    /// Run the state machine for a loaded record. Never fails: every exit
    /// path ends with a terminal status and one outcome notification.
    pub async fn run_record(&self, record: &VideoRecord, logger: &JobLogger) -> RunOutcome {
        let span = logger.create_span();
        self.run_inner(record, logger).instrument(span).await
    }

    async fn run_inner(&self, record: &VideoRecord, logger: &JobLogger) -> RunOutcome {
        metrics::record_run_started();
        logger.log_start(&record.source_url);

        let cursor = StageCursor::new();

        let outcome = match WorkDir::allocate(&self.config.work_root, &record.id).await {
            Ok(dir) => {
                let result = AssertUnwindSafe(self.execute(record, &dir, &cursor, logger))
                    .catch_unwind()
                    .await;

                let outcome = match result {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => self.fault(record, cursor.current(), e.to_string(), logger).await,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        self.fault(record, cursor.current(), message, logger).await
                    }
                };

                let dir_path = dir.path().to_path_buf();
                if let Err(e) = dir.release().await {
                    logger.log_warning(&format!(
                        "Failed to remove working directory {}: {}",
                        dir_path.display(),
                        e
                    ));
                }
                outcome
            }
            Err(e) => {
                let message = WorkerError::work_dir(e.to_string()).to_string();
                self.fault(record, Stage::Download, message, logger).await
            }
        };

        metrics::record_run_finished(outcome.label());
        match &outcome {
            RunOutcome::Completed { summary_degraded } => logger.log_completion(&format!(
                "completed (summary degraded: {})",
                summary_degraded
            )),
            RunOutcome::Failed { status, reason } => {
                logger.log_warning(&format!("ended as {}: {}", status, reason))
            }
            RunOutcome::Skipped { .. } => {}
        }

        outcome
    }

    async fn execute(
        &self,
        record: &VideoRecord,
        dir: &WorkDir,
        cursor: &StageCursor,
        logger: &JobLogger,
    ) -> WorkerResult<RunOutcome> {
        let video_path = dir.file(&format!("{}.mp4", record.external_media_id));
        let audio_path = dir.file(&format!("{}.wav", record.external_media_id));

        // Download
        cursor.enter(Stage::Download);
        let started = Instant::now();
        let fetched = self
            .fetcher
            .fetch(&record.source_url, &video_path, self.config.download_timeout)
            .await;
        let result = artifact_result(fetched, &video_path).await;
        observe(Stage::Download, &result, started);
        if let StageResult::Failed { detail } = result {
            return self.stage_failed(record, Stage::Download, &detail, logger).await;
        }
        self.emitter.progress(record, Stage::Download.progress()).await;
        logger.log_progress("media downloaded");

        // Extract
        cursor.enter(Stage::Extract);
        let started = Instant::now();
        let extracted = self
            .extractor
            .extract(&video_path, &audio_path, self.config.extract_timeout)
            .await;
        let result = artifact_result(extracted, &audio_path).await;
        observe(Stage::Extract, &result, started);
        if let StageResult::Failed { detail } = result {
            return self.stage_failed(record, Stage::Extract, &detail, logger).await;
        }
        self.emitter.progress(record, Stage::Extract.progress()).await;
        logger.log_progress("audio extracted");

        // Transcribe
        cursor.enter(Stage::Transcribe);
        let started = Instant::now();
        let transcribed = self
            .transcriber
            .transcribe(&audio_path, self.config.transcribe_timeout)
            .await;
        let result = transcript_result(transcribed);
        observe(Stage::Transcribe, &result, started);
        let transcript = match result {
            StageResult::Succeeded(transcript) => transcript,
            StageResult::Failed { detail } => {
                return self
                    .stage_failed(record, Stage::Transcribe, &detail, logger)
                    .await;
            }
        };
        self.emitter.progress(record, Stage::Transcribe.progress()).await;

        let language = detect_language(&transcript.auxiliary);
        let text = transcript.text.trim().to_string();
        logger.log_progress(&format!(
            "transcribed {} chars, language {}",
            text.len(),
            language
        ));

        // Summarize
        cursor.enter(Stage::Summarize);
        self.emitter.progress(record, Stage::Summarize.progress()).await;
        let started = Instant::now();
        let (summary, summary_degraded) = self.summarize(&text, logger).await;
        metrics::record_stage_duration(
            Stage::Summarize.as_str(),
            !summary_degraded,
            started.elapsed().as_secs_f64(),
        );

        // Finalize
        cursor.enter(Stage::Finalize);
        self.store
            .update(
                &record.id,
                &RecordUpdate::completed(text, summary.clone(), language),
            )
            .await?;
        self.emitter.progress(record, Stage::Finalize.progress()).await;
        self.emitter.completed(record, &summary).await;

        Ok(RunOutcome::Completed { summary_degraded })
    }

    async fn summarize(&self, text: &str, logger: &JobLogger) -> (String, bool) {
        let result =
            tokio::time::timeout(self.config.summary_timeout, self.summarizer.summarize(text))
                .await;

        let reason = match result {
            Ok(Ok(summary)) if !summary.trim().is_empty() => {
                return (summary.trim().to_string(), false)
            }
            Ok(Ok(_)) => {
                metrics::record_summary_degraded("empty");
                "summarizer returned no text".to_string()
            }
            Ok(Err(e)) => {
                metrics::record_summary_degraded("error");
                e.to_string()
            }
            Err(_) => {
                metrics::record_summary_degraded("timeout");
                format!("timed out after {:?}", self.config.summary_timeout)
            }
        };

        logger.log_warning(&format!("summary unavailable: {}", reason));
        (SUMMARY_UNAVAILABLE.to_string(), true)
    }

    /// A stage produced no valid artifact: record it and report the fixed
    /// reason.
    async fn stage_failed(
        &self,
        record: &VideoRecord,
        stage: Stage,
        detail: &str,
        logger: &JobLogger,
    ) -> WorkerResult<RunOutcome> {
        let status = stage.failure_status();
        let reason = stage.failure_reason().unwrap_or("processing failed");

        logger.log_warning(&format!("{} stage failed: {}", stage, detail));

        self.store
            .update(&record.id, &RecordUpdate::status(status))
            .await?;
        self.emitter.failed(record, status, reason).await;

        Ok(RunOutcome::Failed {
            status,
            reason: reason.to_string(),
        })
    }

    /// Unexpected fault: best-effort status write, then the fault message
    /// goes out as the failure reason.
    async fn fault(
        &self,
        record: &VideoRecord,
        stage: Stage,
        message: String,
        logger: &JobLogger,
    ) -> RunOutcome {
        let status = stage.failure_status();
        logger.log_error(&format!("fault during {}: {}", stage, message));

        if let Err(e) = self
            .store
            .update(&record.id, &RecordUpdate::status(status))
            .await
        {
            logger.log_error(&format!("failed to record status {}: {}", status, e));
        }
        self.emitter.failed(record, status, &message).await;

        RunOutcome::Failed {
            status,
            reason: message,
        }
    }
}

/// A tool stage succeeded iff the call returned and left a non-empty file.
async fn artifact_result(
    result: MediaResult<StageOutput>,
    artifact: &Path,
) -> StageResult<()> {
    match result {
        Ok(output) => {
            if file_has_content(artifact).await {
                StageResult::Succeeded(())
            } else {
                StageResult::failed(format!(
                    "no output at {} (exit {:?}): {}",
                    artifact.display(),
                    output.exit_code,
                    output.stderr_tail(3)
                ))
            }
        }
        Err(e) => StageResult::failed(e.to_string()),
    }
}

fn transcript_result(result: MediaResult<Transcript>) -> StageResult<Transcript> {
    match result {
        Ok(transcript) if !transcript.is_empty() => StageResult::Succeeded(transcript),
        Ok(_) => StageResult::failed("empty transcript"),
        Err(e) => StageResult::failed(e.to_string()),
    }
}

fn observe<T>(stage: Stage, result: &StageResult<T>, started: Instant) {
    metrics::record_stage_duration(
        stage.as_str(),
        matches!(result, StageResult::Succeeded(_)),
        started.elapsed().as_secs_f64(),
    );
}

fn language_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Detected language: (\w+)")
            .unwrap_or_else(|e| unreachable!("static regex is valid: {e}"))
    })
}

/// Language from transcriber diagnostics, or [`UNKNOWN_LANGUAGE`].
pub fn detect_language(auxiliary: &str) -> String {
    language_pattern()
        .captures(auxiliary)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "stage panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failure_mapping() {
        assert_eq!(
            Stage::Download.failure_status(),
            RecordStatus::FailedVideoProcessing
        );
        assert_eq!(
            Stage::Extract.failure_status(),
            RecordStatus::FailedAudioProcessing
        );
        assert_eq!(
            Stage::Transcribe.failure_status(),
            RecordStatus::FailedTranscription
        );
        assert_eq!(
            Stage::Summarize.failure_status(),
            RecordStatus::FailedTranscription
        );
        assert_eq!(
            Stage::Finalize.failure_status(),
            RecordStatus::FailedTranscription
        );

        assert_eq!(Stage::Download.failure_reason(), Some("download failed"));
        assert_eq!(
            Stage::Extract.failure_reason(),
            Some("audio extraction failed")
        );
        assert_eq!(
            Stage::Transcribe.failure_reason(),
            Some("transcription failed")
        );
        assert_eq!(Stage::Summarize.failure_reason(), None);
    }

    #[test]
    fn test_progress_is_strictly_increasing() {
        let stages = [
            Stage::Download,
            Stage::Extract,
            Stage::Transcribe,
            Stage::Summarize,
            Stage::Finalize,
        ];
        let progress: Vec<u8> = stages.iter().map(Stage::progress).collect();
        assert_eq!(progress, vec![20, 40, 60, 80, 100]);
    }

    #[test]
    fn test_stage_cursor() {
        let cursor = StageCursor::new();
        assert_eq!(cursor.current(), Stage::Download);
        cursor.enter(Stage::Summarize);
        assert_eq!(cursor.current(), Stage::Summarize);
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(
            detect_language("Detecting language...\nDetected language: English\n"),
            "English"
        );
        assert_eq!(detect_language("no banner here"), UNKNOWN_LANGUAGE);
        assert_eq!(detect_language(""), UNKNOWN_LANGUAGE);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(payload.as_ref()), "owned boom");

        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "stage panicked");
    }

    #[tokio::test]
    async fn test_artifact_result_requires_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.mp4");
        let ok = StageOutput {
            success: true,
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            elapsed: Duration::ZERO,
        };

        // Success exit without a file is still a failure
        assert!(matches!(
            artifact_result(Ok(ok.clone()), &path).await,
            StageResult::Failed { .. }
        ));

        tokio::fs::write(&path, b"media").await.unwrap();
        assert_eq!(
            artifact_result(Ok(ok), &path).await,
            StageResult::Succeeded(())
        );

        // A failed exit that still left a file counts as success
        let failed_exit = StageOutput {
            success: false,
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "warning".to_string(),
            elapsed: Duration::ZERO,
        };
        assert_eq!(
            artifact_result(Ok(failed_exit), &path).await,
            StageResult::Succeeded(())
        );
    }

    #[test]
    fn test_transcript_result() {
        assert!(matches!(
            transcript_result(Ok(Transcript::new("  \n", "Detected language: English"))),
            StageResult::Failed { .. }
        ));
        assert!(matches!(
            transcript_result(Ok(Transcript::new("hello", ""))),
            StageResult::Succeeded(_)
        ));
    }
}
