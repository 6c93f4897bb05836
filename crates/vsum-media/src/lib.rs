#![deny(unreachable_patterns)]
//! External tool adapters for the summarization pipeline.
//!
//! This crate provides:
//! - A time-bounded stage executor for external commands
//! - Media download via yt-dlp
//! - Audio extraction via FFmpeg (mono, 16 kHz, s16le PCM)
//! - Transcription via the Whisper CLI
//! - Best-effort scraping of source page details

pub mod adapters;
pub mod audio;
pub mod command;
pub mod details;
pub mod download;
pub mod error;
pub mod fs_utils;
pub mod transcribe;

pub use adapters::{AudioExtractor, DetailsFetcher, MediaFetcher, Transcriber, Transcript};
pub use audio::FfmpegAudioExtractor;
pub use command::{check_tool, StageCommand, StageExecutor, StageOutput};
pub use details::{parse_details, PageDetailsFetcher};
pub use download::YtDlpFetcher;
pub use error::{MediaError, MediaResult};
pub use fs_utils::file_has_content;
pub use transcribe::WhisperTranscriber;
