//! Best-effort notification emitter.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use vsum_models::{Notification, RecordStatus, VideoRecord};
use vsum_queue::Notifier;

use crate::metrics::record_notify_failure;

/// Wraps a [`Notifier`] so that publishing never fails or stalls a run.
///
/// Each publish is bounded by `timeout`; errors and timeouts are logged,
/// counted and dropped.
#[derive(Clone)]
pub struct NotificationEmitter {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl NotificationEmitter {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self { notifier, timeout }
    }

    /// Stage progress for `record`.
    pub async fn progress(&self, record: &VideoRecord, percent: u8) {
        let msg = Notification::progress(record.id.clone(), percent);
        self.emit(&record.owner_id, &msg).await;
    }

    /// Successful outcome.
    pub async fn completed(&self, record: &VideoRecord, summary: &str) {
        let msg = Notification::completed(record, summary);
        self.emit(&record.owner_id, &msg).await;
    }

    /// Failed outcome.
    pub async fn failed(&self, record: &VideoRecord, status: RecordStatus, reason: &str) {
        let msg = Notification::failed(record, status, reason);
        self.emit(&record.owner_id, &msg).await;
    }

    async fn emit(&self, owner_id: &str, msg: &Notification) {
        let kind = msg.kind().as_str();
        match tokio::time::timeout(self.timeout, self.notifier.publish(owner_id, msg)).await {
            Ok(Ok(())) => debug!(record_id = %msg.record_id(), "Published {} notification", kind),
            Ok(Err(e)) => {
                record_notify_failure(kind);
                warn!(record_id = %msg.record_id(), "Failed to publish {} notification: {}", kind, e);
            }
            Err(_) => {
                record_notify_failure(kind);
                warn!(
                    record_id = %msg.record_id(),
                    "Publishing {} notification timed out after {:?}", kind, self.timeout
                );
            }
        }
    }
}
