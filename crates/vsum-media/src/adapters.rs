//! Contracts for the external tools the pipeline drives.
//!
//! Each adapter is a black box with a fixed input/output contract. None of
//! them decides whether a stage succeeded; the orchestrator inspects the
//! artifacts they leave behind.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use vsum_models::VideoDetails;

use crate::command::StageOutput;
use crate::error::MediaResult;

/// Downloads a media file.
///
/// A tool may exit successfully without producing `dest` (some source
/// errors are reported that way), so callers must check the file.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path, timeout: Duration) -> MediaResult<StageOutput>;
}

/// Extracts a mono, 16 kHz, 16-bit PCM WAV track from a media file.
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    async fn extract(&self, src: &Path, dest: &Path, timeout: Duration)
        -> MediaResult<StageOutput>;
}

/// Speech-to-text over an audio file.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path, timeout: Duration) -> MediaResult<Transcript>;
}

/// Transcriber output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    /// Transcript text; may be empty when the tool produced nothing
    pub text: String,
    /// Free-form diagnostic output (language banners, warnings)
    pub auxiliary: String,
}

impl Transcript {
    pub fn new(text: impl Into<String>, auxiliary: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            auxiliary: auxiliary.into(),
        }
    }

    /// True when there is no usable text.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Best-effort metadata lookup for a source page.
///
/// Implementations never fail: anything that goes wrong yields empty details.
#[async_trait]
pub trait DetailsFetcher: Send + Sync {
    async fn fetch_details(&self, url: &str) -> VideoDetails;
}
