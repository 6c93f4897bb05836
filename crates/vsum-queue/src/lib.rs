//! Redis Streams job queue and notification channels.
//!
//! This crate provides:
//! - Job enqueueing via Redis Streams with per-record deduplication
//! - Worker consumption and acknowledgement
//! - Per-owner notifications via Redis Pub/Sub (or in-process broadcast)

pub mod error;
pub mod job;
pub mod notify;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::ProcessVideoJob;
pub use notify::{channel_name, InMemoryNotifier, NotificationStream, Notifier, RedisNotifier};
pub use queue::{parse_job, JobDispatcher, JobQueue, QueueConfig};
