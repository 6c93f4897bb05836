//! Shared data models for the vsum backend.
//!
//! This crate provides Serde-serializable types for:
//! - Video records and their processing status
//! - Job identifiers
//! - Notification message schemas
//! - Source URL parsing

pub mod job;
pub mod notification;
pub mod record;
pub mod utils;

// Re-export common types
pub use job::JobId;
pub use notification::{Notification, NotificationKind};
pub use record::{RecordId, RecordStatus, RecordUpdate, UnknownStatus, VideoDetails, VideoRecord};
pub use utils::{extract_media_id, extract_media_id_opt, MediaIdError, MediaIdResult, MEDIA_ID_LEN};
