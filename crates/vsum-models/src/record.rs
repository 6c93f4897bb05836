//! Video record models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a submitted video record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    /// Generate a new random record ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Processing status of a record.
///
/// Each `Failed*` variant names the stage that stopped the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// A run is queued or in progress
    #[default]
    Processing,
    /// Transcript and summary are available
    Completed,
    /// Media download produced no file
    FailedVideoProcessing,
    /// Audio extraction produced no file
    FailedAudioProcessing,
    /// Transcription produced no text
    FailedTranscription,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Processing => "processing",
            RecordStatus::Completed => "completed",
            RecordStatus::FailedVideoProcessing => "failed_video_processing",
            RecordStatus::FailedAudioProcessing => "failed_audio_processing",
            RecordStatus::FailedTranscription => "failed_transcription",
        }
    }

    /// True for any of the stage failure statuses.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            RecordStatus::FailedVideoProcessing
                | RecordStatus::FailedAudioProcessing
                | RecordStatus::FailedTranscription
        )
    }

    /// A run has ended and no further pipeline updates are expected.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecordStatus::Processing)
    }

    /// Only failed records may be re-entered by an explicit retry.
    pub fn is_retryable(&self) -> bool {
        self.is_failed()
    }

    /// All failure statuses, in pipeline order.
    pub fn failure_statuses() -> [RecordStatus; 3] {
        [
            RecordStatus::FailedVideoProcessing,
            RecordStatus::FailedAudioProcessing,
            RecordStatus::FailedTranscription,
        ]
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown record status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for RecordStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(RecordStatus::Processing),
            "completed" => Ok(RecordStatus::Completed),
            "failed_video_processing" => Ok(RecordStatus::FailedVideoProcessing),
            "failed_audio_processing" => Ok(RecordStatus::FailedAudioProcessing),
            "failed_transcription" => Ok(RecordStatus::FailedTranscription),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Page details scraped at submission time. Every field is best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VideoDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    /// Published date as reported by the page (usually ISO-8601)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
}

/// A submitted video and everything the pipeline produced for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoRecord {
    /// Unique record ID
    pub id: RecordId,

    /// Submitting actor; notifications are scoped to it
    pub owner_id: String,

    /// Original URL as submitted
    pub source_url: String,

    /// 11-character media id extracted from `source_url`
    pub external_media_id: String,

    /// Processing status
    #[serde(default)]
    pub status: RecordStatus,

    /// Page details
    #[serde(default)]
    pub details: VideoDetails,

    /// Full transcript (completed records only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,

    /// Summary or the unavailable sentinel (completed records only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Language reported by the transcriber (completed records only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_language: Option<String>,

    /// Session token for the chat feature
    pub chat_session_id: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Soft-delete marker, owned by the CRUD layer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl VideoRecord {
    /// Create a new record in `processing` status with blank result fields.
    pub fn new(
        owner_id: impl Into<String>,
        source_url: impl Into<String>,
        external_media_id: impl Into<String>,
        details: VideoDetails,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: RecordId::new(),
            owner_id: owner_id.into(),
            source_url: source_url.into(),
            external_media_id: external_media_id.into(),
            status: RecordStatus::Processing,
            details,
            transcription: None,
            summary: None,
            detected_language: None,
            chat_session_id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Title used in notifications.
    pub fn title(&self) -> Option<&str> {
        self.details.title.as_deref()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Partial update applied by the record store.
///
/// Only `Some` fields are written; everything else is left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub status: Option<RecordStatus>,
    pub transcription: Option<String>,
    pub summary: Option<String>,
    pub detected_language: Option<String>,
}

impl RecordUpdate {
    /// Status-only update.
    pub fn status(status: RecordStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Final update for a successful run.
    pub fn completed(
        transcription: impl Into<String>,
        summary: impl Into<String>,
        detected_language: impl Into<String>,
    ) -> Self {
        Self {
            status: Some(RecordStatus::Completed),
            transcription: Some(transcription.into()),
            summary: Some(summary.into()),
            detected_language: Some(detected_language.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.transcription.is_none()
            && self.summary.is_none()
            && self.detected_language.is_none()
    }

    /// Apply this update to a record in place.
    pub fn apply_to(&self, record: &mut VideoRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(ref transcription) = self.transcription {
            record.transcription = Some(transcription.clone());
        }
        if let Some(ref summary) = self.summary {
            record.summary = Some(summary.clone());
        }
        if let Some(ref language) = self.detected_language {
            record.detected_language = Some(language.clone());
        }
        record.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_generation() {
        let id1 = RecordId::new();
        let id2 = RecordId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_new_record_is_processing_and_blank() {
        let record = VideoRecord::new(
            "user-1",
            "https://platform.example/watch?v=ABCDEFGHIJK",
            "ABCDEFGHIJK",
            VideoDetails::default(),
        );

        assert_eq!(record.status, RecordStatus::Processing);
        assert!(record.transcription.is_none());
        assert!(record.summary.is_none());
        assert!(record.detected_language.is_none());
        assert!(!record.chat_session_id.is_empty());
        assert!(!record.is_deleted());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            RecordStatus::Processing,
            RecordStatus::Completed,
            RecordStatus::FailedVideoProcessing,
            RecordStatus::FailedAudioProcessing,
            RecordStatus::FailedTranscription,
        ] {
            assert_eq!(status.as_str().parse::<RecordStatus>().unwrap(), status);
        }
        assert!("stale".parse::<RecordStatus>().is_err());
    }

    #[test]
    fn test_status_classification() {
        assert!(!RecordStatus::Processing.is_terminal());
        assert!(RecordStatus::Completed.is_terminal());
        assert!(!RecordStatus::Completed.is_retryable());
        for status in RecordStatus::failure_statuses() {
            assert!(status.is_failed());
            assert!(status.is_retryable());
        }
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&RecordStatus::FailedAudioProcessing).unwrap();
        assert_eq!(json, "\"failed_audio_processing\"");
    }

    #[test]
    fn test_update_only_touches_given_fields() {
        let mut record = VideoRecord::new("u", "url", "ABCDEFGHIJK", VideoDetails::default());
        RecordUpdate::status(RecordStatus::FailedTranscription).apply_to(&mut record);
        assert_eq!(record.status, RecordStatus::FailedTranscription);
        assert!(record.transcription.is_none());

        RecordUpdate::completed("text", "summary", "en").apply_to(&mut record);
        assert_eq!(record.status, RecordStatus::Completed);
        assert_eq!(record.summary.as_deref(), Some("summary"));
        assert_eq!(record.detected_language.as_deref(), Some("en"));
    }
}
