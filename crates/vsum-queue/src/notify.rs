//! Per-owner notification channels.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::Stream;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tracing::debug;
use vsum_models::Notification;

use crate::error::{QueueError, QueueResult};

/// Boxed notification stream returned by subscriptions.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Notification> + Send>>;

/// Output port for run notifications.
///
/// Delivery is best-effort: no persistence, no replay. Callers decide how
/// long to wait and what to do with an error.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, owner_id: &str, notification: &Notification) -> QueueResult<()>;
}

/// Channel name for an owner. Scoped by owner, never by record.
pub fn channel_name(owner_id: &str) -> String {
    format!("users:{}:videos", owner_id)
}

/// Redis Pub/Sub notifier.
pub struct RedisNotifier {
    client: redis::Client,
}

impl RedisNotifier {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Subscribe to an owner's notifications.
    pub async fn subscribe(&self, owner_id: &str) -> QueueResult<NotificationStream> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel_name(owner_id)).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn publish(&self, owner_id: &str, notification: &Notification) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = channel_name(owner_id);
        let payload = serde_json::to_string(notification)?;

        debug!("Publishing {} notification to {}", notification.kind().as_str(), channel);
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }
}

/// In-process notifier backed by broadcast channels.
///
/// Keeps a log of everything published so tests can inspect the sequence
/// per owner.
pub struct InMemoryNotifier {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<Notification>>>,
    history: Mutex<Vec<(String, Notification)>>,
}

impl Default for InMemoryNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl InMemoryNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    fn sender(&self, owner_id: &str) -> QueueResult<broadcast::Sender<Notification>> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| QueueError::PublishFailed("channel map poisoned".to_string()))?;
        Ok(channels
            .entry(owner_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone())
    }

    /// Subscribe to an owner's notifications.
    pub fn subscribe(&self, owner_id: &str) -> QueueResult<broadcast::Receiver<Notification>> {
        Ok(self.sender(owner_id)?.subscribe())
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<(String, Notification)> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Notifications published to one owner, in order.
    pub fn published_to(&self, owner_id: &str) -> Vec<Notification> {
        self.published()
            .into_iter()
            .filter(|(owner, _)| owner == owner_id)
            .map(|(_, n)| n)
            .collect()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn publish(&self, owner_id: &str, notification: &Notification) -> QueueResult<()> {
        if let Ok(mut history) = self.history.lock() {
            history.push((owner_id.to_string(), notification.clone()));
        }
        // No receivers is fine: nobody is listening right now.
        let _ = self.sender(owner_id)?.send(notification.clone());
        Ok(())
    }
}
