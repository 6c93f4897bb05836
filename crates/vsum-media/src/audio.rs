//! Audio extraction with FFmpeg.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::adapters::AudioExtractor;
use crate::command::{StageCommand, StageExecutor, StageOutput};
use crate::error::MediaResult;

/// Output sample rate expected by the transcriber.
pub const SAMPLE_RATE_HZ: u32 = 16_000;

/// Output channel count.
pub const CHANNELS: u8 = 1;

/// Output codec (signed 16-bit little-endian PCM).
pub const PCM_CODEC: &str = "pcm_s16le";

/// FFmpeg backed [`AudioExtractor`].
#[derive(Debug, Clone)]
pub struct FfmpegAudioExtractor {
    executor: StageExecutor,
    program: String,
    log_level: String,
}

impl Default for FfmpegAudioExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegAudioExtractor {
    pub fn new() -> Self {
        Self {
            executor: StageExecutor::new(),
            program: "ffmpeg".to_string(),
            log_level: "error".to_string(),
        }
    }

    /// Override the program path.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Set FFmpeg's `-v` level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the extraction command.
    pub fn build_command(&self, src: &Path, dest: &Path) -> StageCommand {
        StageCommand::new(&self.program)
            .arg("-y")
            .option("-v", &self.log_level)
            .arg("-i")
            .path_arg(src)
            .arg("-vn")
            .option("-acodec", PCM_CODEC)
            .option("-ar", SAMPLE_RATE_HZ.to_string())
            .option("-ac", CHANNELS.to_string())
            .path_arg(dest)
    }
}

#[async_trait]
impl AudioExtractor for FfmpegAudioExtractor {
    async fn extract(
        &self,
        src: &Path,
        dest: &Path,
        timeout: Duration,
    ) -> MediaResult<StageOutput> {
        let working_dir = dest.parent().unwrap_or_else(|| Path::new("."));
        let cmd = self.build_command(src, dest);

        info!("Extracting audio {} -> {}", src.display(), dest.display());

        self.executor.run(&cmd, working_dir, timeout).await
    }
}
