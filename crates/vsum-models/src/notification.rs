//! Notification message types pushed to the owning subscriber.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::record::{RecordId, RecordStatus, VideoRecord};

/// Notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Stage progress
    Progress,
    /// Run finished with a summary
    Completed,
    /// Run stopped at a stage
    Failed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Progress => "progress",
            NotificationKind::Completed => "completed",
            NotificationKind::Failed => "failed",
        }
    }

    /// Outcome kinds end a run; progress never does.
    pub fn is_outcome(&self) -> bool {
        !matches!(self, NotificationKind::Progress)
    }
}

/// Notification envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Progress update (0-100)
    Progress {
        #[serde(rename = "recordId")]
        record_id: RecordId,
        percent: u8,
    },

    /// Run completed
    Completed {
        id: RecordId,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        summary: String,
        status: RecordStatus,
        #[serde(rename = "externalMediaId")]
        external_media_id: String,
    },

    /// Run failed
    Failed {
        id: RecordId,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        status: RecordStatus,
        reason: String,
    },
}

impl Notification {
    /// Create a progress notification.
    pub fn progress(record_id: RecordId, percent: u8) -> Self {
        Notification::Progress {
            record_id,
            percent: percent.min(100),
        }
    }

    /// Create a completion notification from a finished record.
    pub fn completed(record: &VideoRecord, summary: impl Into<String>) -> Self {
        Notification::Completed {
            id: record.id.clone(),
            title: record.details.title.clone(),
            summary: summary.into(),
            status: RecordStatus::Completed,
            external_media_id: record.external_media_id.clone(),
        }
    }

    /// Create a failure notification.
    pub fn failed(record: &VideoRecord, status: RecordStatus, reason: impl Into<String>) -> Self {
        Notification::Failed {
            id: record.id.clone(),
            title: record.details.title.clone(),
            status,
            reason: reason.into(),
        }
    }

    /// Get the notification kind.
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::Progress { .. } => NotificationKind::Progress,
            Notification::Completed { .. } => NotificationKind::Completed,
            Notification::Failed { .. } => NotificationKind::Failed,
        }
    }

    /// Record this notification refers to.
    pub fn record_id(&self) -> &RecordId {
        match self {
            Notification::Progress { record_id, .. } => record_id,
            Notification::Completed { id, .. } => id,
            Notification::Failed { id, .. } => id,
        }
    }

    /// Progress percentage, if this is a progress notification.
    pub fn percent(&self) -> Option<u8> {
        match self {
            Notification::Progress { percent, .. } => Some(*percent),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::VideoDetails;

    fn record() -> VideoRecord {
        VideoRecord::new(
            "user-1",
            "https://platform.example/watch?v=ABCDEFGHIJK",
            "ABCDEFGHIJK",
            VideoDetails {
                title: Some("A talk".to_string()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_progress_serialization() {
        let msg = Notification::progress(RecordId::from("rec-1"), 40);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"progress\""));
        assert!(json.contains("\"recordId\":\"rec-1\""));
        assert!(json.contains("\"percent\":40"));
    }

    #[test]
    fn test_progress_clamps() {
        let msg = Notification::progress(RecordId::from("rec-1"), 150);
        assert_eq!(msg.percent(), Some(100));
    }

    #[test]
    fn test_completed_carries_record_fields() {
        let record = record();
        let msg = Notification::completed(&record, "short summary");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"completed\""));
        assert!(json.contains("\"externalMediaId\":\"ABCDEFGHIJK\""));
        assert!(json.contains("\"status\":\"completed\""));
        assert!(json.contains("\"title\":\"A talk\""));
        assert_eq!(msg.record_id(), &record.id);
        assert!(msg.kind().is_outcome());
    }

    #[test]
    fn test_failed_carries_reason_and_status() {
        let record = record();
        let msg = Notification::failed(
            &record,
            RecordStatus::FailedVideoProcessing,
            "download failed",
        );
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"failed\""));
        assert!(json.contains("\"status\":\"failed_video_processing\""));
        assert!(json.contains("\"reason\":\"download failed\""));

        let back: Notification = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), NotificationKind::Failed);
    }
}
