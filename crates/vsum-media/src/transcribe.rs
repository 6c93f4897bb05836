//! Speech-to-text using the Whisper CLI.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{info, warn};

use crate::adapters::{Transcriber, Transcript};
use crate::command::{StageCommand, StageExecutor};
use crate::error::MediaResult;

/// Default Whisper model size.
pub const DEFAULT_MODEL: &str = "base";

/// Whisper CLI backed [`Transcriber`].
///
/// The tool runs inside the audio file's directory, so its side files
/// (`.txt`, `.srt`, ...) land next to the audio and are removed with it.
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    executor: StageExecutor,
    program: String,
    model: String,
}

impl Default for WhisperTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl WhisperTranscriber {
    pub fn new() -> Self {
        Self {
            executor: StageExecutor::new(),
            program: "whisper".to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Override the program path.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Set the `--model` value.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Build the transcription command for a file in the working directory.
    pub fn build_command(&self, file_name: &str) -> StageCommand {
        StageCommand::new(&self.program)
            .arg(file_name)
            .option("--model", &self.model)
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &Path, timeout: Duration) -> MediaResult<Transcript> {
        let working_dir = audio.parent().unwrap_or_else(|| Path::new("."));
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| audio.to_string_lossy().into_owned());

        info!("Transcribing {} with model {}", audio.display(), self.model);

        let cmd = self.build_command(&file_name);
        let output = self.executor.run(&cmd, working_dir, timeout).await?;

        let mut transcript = split_output(&output.stdout);
        if !output.stderr.is_empty() {
            if !transcript.auxiliary.is_empty() {
                transcript.auxiliary.push('\n');
            }
            transcript.auxiliary.push_str(&output.stderr);
        }

        if !output.success {
            warn!(
                exit_code = ?output.exit_code,
                "Transcriber exited with failure, keeping {} chars of text",
                transcript.text.len()
            );
        }

        Ok(transcript)
    }
}

fn segment_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[\d{1,2}:\d{2}(?::\d{2})?\.\d{3} --> \d{1,2}:\d{2}(?::\d{2})?\.\d{3}\]\s*")
            .unwrap_or_else(|e| unreachable!("static regex is valid: {e}"))
    })
}

/// Split Whisper stdout into transcript text and banner lines.
///
/// Language banners go to `auxiliary`; segment timestamps are stripped from
/// the remaining lines.
pub fn split_output(stdout: &str) -> Transcript {
    let mut text = Vec::new();
    let mut auxiliary = Vec::new();

    for line in stdout.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with("Detected language") || trimmed.starts_with("Detecting language")
        {
            auxiliary.push(trimmed);
            continue;
        }
        let content = segment_prefix().replace(trimmed, "");
        let content = content.trim();
        if !content.is_empty() {
            text.push(content.to_string());
        }
    }

    Transcript::new(text.join("\n"), auxiliary.join("\n"))
}
