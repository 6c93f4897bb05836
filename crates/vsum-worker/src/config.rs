//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};
use crate::pipeline::PipelineConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent runs
    pub max_concurrent_jobs: usize,
    /// Root for per-record working directories
    pub work_dir: PathBuf,
    /// Media download time limit
    pub download_timeout: Duration,
    /// Audio extraction time limit
    pub extract_timeout: Duration,
    /// Transcription time limit
    pub transcribe_timeout: Duration,
    /// Summarization time limit (whole call, including retries)
    pub summary_timeout: Duration,
    /// Per-publish notification time limit
    pub notify_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Whisper model name
    pub whisper_model: String,
    /// yt-dlp format selector
    pub ytdlp_format: String,
    /// Optional Netscape cookies file for yt-dlp
    pub ytdlp_cookies: Option<PathBuf>,
    /// How often the worker should scan for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a pending job can be claimed (crash recovery).
    /// Must exceed the summed stage limits.
    pub claim_min_idle: Duration,
    /// How often a running job refreshes its pending entry
    pub job_heartbeat_interval: Duration,
    /// Prometheus exporter port; no exporter when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            work_dir: PathBuf::from("/tmp/vsum"),
            download_timeout: Duration::from_secs(3000),
            extract_timeout: Duration::from_secs(3000),
            transcribe_timeout: Duration::from_secs(3000),
            summary_timeout: Duration::from_secs(120),
            notify_timeout: Duration::from_millis(2000),
            shutdown_timeout: Duration::from_secs(60),
            whisper_model: "base".to_string(),
            ytdlp_format: "best".to_string(),
            ytdlp_cookies: None,
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(10800),
            job_heartbeat_interval: Duration::from_secs(30),
            metrics_port: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(env_parse(name).unwrap_or(default))
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let config = Self {
            max_concurrent_jobs: env_parse::<usize>("WORKER_MAX_JOBS")
                .unwrap_or(2)
                .max(1),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/vsum")),
            download_timeout: env_secs("DOWNLOAD_TIMEOUT_SECS", 3000),
            extract_timeout: env_secs("EXTRACT_TIMEOUT_SECS", 3000),
            transcribe_timeout: env_secs("TRANSCRIBE_TIMEOUT_SECS", 3000),
            summary_timeout: env_secs("SUMMARY_TIMEOUT_SECS", 120),
            notify_timeout: Duration::from_millis(env_parse("NOTIFY_TIMEOUT_MS").unwrap_or(2000)),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT", 60),
            whisper_model: std::env::var("WHISPER_MODEL").unwrap_or_else(|_| "base".to_string()),
            ytdlp_format: std::env::var("YTDLP_FORMAT").unwrap_or_else(|_| "best".to_string()),
            ytdlp_cookies: std::env::var("YTDLP_COOKIES_PATH").ok().map(PathBuf::from),
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS", 30),
            claim_min_idle: env_secs("WORKER_CLAIM_MIN_IDLE_SECS", 10800),
            job_heartbeat_interval: env_secs("WORKER_JOB_HEARTBEAT_SECS", 30)
                .max(Duration::from_secs(1)),
            metrics_port: env_parse("METRICS_PORT"),
        };
        config.validate()?;
        Ok(config)
    }

    /// Longest a single run can spend inside its time-bounded stages.
    pub fn run_time_limit(&self) -> Duration {
        self.download_timeout
            + self.extract_timeout
            + self.transcribe_timeout
            + self.summary_timeout
    }

    /// Reject limits that would let crash recovery claim a live run.
    pub fn validate(&self) -> WorkerResult<()> {
        let limit = self.run_time_limit();
        if self.claim_min_idle <= limit {
            return Err(WorkerError::config_error(format!(
                "WORKER_CLAIM_MIN_IDLE_SECS ({}s) must exceed the summed stage timeouts ({}s)",
                self.claim_min_idle.as_secs(),
                limit.as_secs()
            )));
        }
        if self.job_heartbeat_interval >= self.claim_min_idle {
            return Err(WorkerError::config_error(format!(
                "WORKER_JOB_HEARTBEAT_SECS ({}s) must be shorter than WORKER_CLAIM_MIN_IDLE_SECS ({}s)",
                self.job_heartbeat_interval.as_secs(),
                self.claim_min_idle.as_secs()
            )));
        }
        Ok(())
    }

    /// Settings the pipeline needs.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            work_root: self.work_dir.clone(),
            download_timeout: self.download_timeout,
            extract_timeout: self.extract_timeout,
            transcribe_timeout: self.transcribe_timeout,
            summary_timeout: self.summary_timeout,
            notify_timeout: self.notify_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.download_timeout, Duration::from_secs(3000));
        assert_eq!(config.summary_timeout, Duration::from_secs(120));
        assert_eq!(config.whisper_model, "base");
        assert!(config.metrics_port.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_claim_window_must_exceed_stage_limits() {
        let config = WorkerConfig {
            claim_min_idle: Duration::from_secs(3600),
            ..Default::default()
        };
        assert_eq!(config.run_time_limit(), Duration::from_secs(9120));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, WorkerError::ConfigError(_)));

        let exact = WorkerConfig {
            claim_min_idle: Duration::from_secs(9120),
            ..Default::default()
        };
        assert!(exact.validate().is_err());

        let short_stages = WorkerConfig {
            download_timeout: Duration::from_secs(600),
            extract_timeout: Duration::from_secs(600),
            transcribe_timeout: Duration::from_secs(600),
            claim_min_idle: Duration::from_secs(3600),
            ..Default::default()
        };
        assert!(short_stages.validate().is_ok());
    }

    #[test]
    fn test_heartbeat_must_fit_claim_window() {
        let config = WorkerConfig {
            job_heartbeat_interval: Duration::from_secs(10800),
            ..Default::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            WorkerError::ConfigError(_)
        ));
    }

    #[test]
    fn test_pipeline_config_carries_limits() {
        let config = WorkerConfig {
            work_dir: PathBuf::from("/data/vsum"),
            summary_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.work_root, PathBuf::from("/data/vsum"));
        assert_eq!(pipeline.summary_timeout, Duration::from_secs(5));
        assert_eq!(pipeline.notify_timeout, Duration::from_millis(2000));
    }
}
