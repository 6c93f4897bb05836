//! Job queue using Redis Streams.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, info, warn};
use vsum_models::RecordId;

use crate::error::{QueueError, QueueResult};
use crate::job::ProcessVideoJob;

/// Hands a job to whatever runs the pipeline.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    /// Dispatch a job. Fails with [`QueueError::DuplicateJob`] if one is
    /// already outstanding for the same record.
    async fn dispatch(&self, job: ProcessVideoJob) -> QueueResult<String>;
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dedup key prefix
    pub dedup_prefix: String,
    /// Dedup key lifetime; bounds how long a lost job can block re-dispatch
    pub dedup_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "vsum:jobs".to_string(),
            consumer_group: "vsum:workers".to_string(),
            dedup_prefix: "vsum:dedup".to_string(),
            dedup_ttl: Duration::from_secs(3 * 3600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            stream_name: std::env::var("QUEUE_STREAM")
                .unwrap_or_else(|_| "vsum:jobs".to_string()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| "vsum:workers".to_string()),
            dedup_prefix: "vsum:dedup".to_string(),
            dedup_ttl: Duration::from_secs(
                std::env::var("QUEUE_DEDUP_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3 * 3600),
            ),
        }
    }

    /// Dedup key for a record.
    pub fn dedup_key(&self, record_id: &RecordId) -> String {
        format!("{}:process:{}", self.dedup_prefix, record_id)
    }
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // Create consumer group (ignore error if already exists)
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue a process job.
    ///
    /// The dedup key is claimed with `SET NX` before the stream append, so
    /// two concurrent dispatches for one record cannot both succeed.
    pub async fn enqueue(&self, job: &ProcessVideoJob) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(job)?;
        let dedup_key = self.config.dedup_key(&job.record_id);

        let claimed: Option<String> = redis::cmd("SET")
            .arg(&dedup_key)
            .arg(job.job_id.as_str())
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedup_ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        if claimed.is_none() {
            warn!("Duplicate job rejected: {}", job.idempotency_key());
            return Err(QueueError::DuplicateJob(job.idempotency_key()));
        }

        let appended: Result<String, redis::RedisError> = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(job.idempotency_key())
            .query_async(&mut conn)
            .await;

        let message_id = match appended {
            Ok(id) => id,
            Err(e) => {
                // Release the claim so the record can be dispatched again.
                conn.del::<_, ()>(&dedup_key).await.ok();
                return Err(QueueError::Redis(e));
            }
        };

        info!(
            record_id = %job.record_id,
            "Enqueued job {} with message ID {}",
            job.job_id,
            message_id
        );

        Ok(message_id)
    }

    /// Release the dedup claim for a record once its run has ended.
    pub async fn clear_dedup(&self, record_id: &RecordId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(self.config.dedup_key(record_id)).await?;
        Ok(())
    }

    /// Acknowledge a job (mark as completed).
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        // Delete the message from the stream
        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    /// Refresh a pending entry owned by a live run.
    ///
    /// Resets the entry's idle time so [`claim_pending`](Self::claim_pending)
    /// on other workers does not treat it as orphaned. Returns `false` when
    /// the entry is no longer pending.
    pub async fn touch(&self, consumer_name: &str, message_id: &str) -> QueueResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let claimed: Vec<String> = self
            .heartbeat_cmd(consumer_name, message_id)
            .query_async(&mut conn)
            .await?;
        debug!("Heartbeat for job {}", message_id);
        Ok(!claimed.is_empty())
    }

    fn heartbeat_cmd(&self, consumer_name: &str, message_id: &str) -> redis::Cmd {
        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(0)
            .arg(message_id)
            .arg("JUSTID");
        cmd
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Consume jobs from the queue.
    /// Returns (message_id, job) pairs.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, ProcessVideoJob)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // Read from consumer group
        let result: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();
        let Some(result) = result else {
            return Ok(jobs);
        };

        for stream_key in result.keys {
            for entry in stream_key.ids {
                self.collect_entry(entry.id, entry.map.get("job"), &mut jobs)
                    .await;
            }
        }

        Ok(jobs)
    }

    /// Claim pending jobs that have been idle for too long.
    /// This handles jobs from crashed workers.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<(String, ProcessVideoJob)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: redis::streams::StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();
        for entry in result.claimed {
            self.collect_entry(entry.id, entry.map.get("job"), &mut jobs)
                .await;
        }

        if !jobs.is_empty() {
            info!("Claimed {} pending job(s) from stream", jobs.len());
        }

        Ok(jobs)
    }

    async fn collect_entry(
        &self,
        message_id: String,
        payload: Option<&redis::Value>,
        jobs: &mut Vec<(String, ProcessVideoJob)>,
    ) {
        let Some(redis::Value::BulkString(payload)) = payload else {
            warn!("Stream entry {} has no job payload", message_id);
            self.ack(&message_id).await.ok();
            return;
        };

        match parse_job(payload) {
            Ok(job) => {
                debug!("Consumed job {} from stream", job.job_id);
                jobs.push((message_id, job));
            }
            Err(e) => {
                warn!("Failed to parse job payload: {}", e);
                // Ack the malformed message to prevent reprocessing
                self.ack(&message_id).await.ok();
            }
        }
    }
}

#[async_trait]
impl JobDispatcher for JobQueue {
    async fn dispatch(&self, job: ProcessVideoJob) -> QueueResult<String> {
        self.enqueue(&job).await
    }
}

/// Decode a stream payload.
pub fn parse_job(payload: &[u8]) -> QueueResult<ProcessVideoJob> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_resets_idle_without_payload() {
        let queue = JobQueue::new(QueueConfig::default()).unwrap();
        let packed = queue
            .heartbeat_cmd("worker-a", "1700000000000-0")
            .get_packed_command();
        let packed = String::from_utf8_lossy(&packed);

        let expected = [
            "XCLAIM",
            "vsum:jobs",
            "vsum:workers",
            "worker-a",
            "0",
            "1700000000000-0",
            "JUSTID",
        ]
        .iter()
        .map(|arg| format!("${}\r\n{}\r\n", arg.len(), arg))
        .collect::<String>();
        assert!(packed.ends_with(&expected));
    }

    #[test]
    fn test_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_name, "vsum:jobs");
        assert_eq!(config.consumer_group, "vsum:workers");
    }

    #[test]
    fn test_dedup_key() {
        let config = QueueConfig::default();
        assert_eq!(
            config.dedup_key(&RecordId::from("rec-1")),
            "vsum:dedup:process:rec-1"
        );
    }

    #[test]
    fn test_parse_job() {
        let job = ProcessVideoJob::new(RecordId::from("rec-1"), "user-1");
        let payload = serde_json::to_vec(&job).unwrap();

        assert_eq!(parse_job(&payload).unwrap(), job);
        assert!(parse_job(b"{\"nope\":1}").is_err());
    }
}
