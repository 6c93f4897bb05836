//! Video record persistence.
//!
//! This crate provides:
//! - The [`RecordStore`] contract used by the worker and submission service
//! - An in-memory backend for tests and local runs
//! - A Redis hash backend with an atomic retry reset

pub mod error;
pub mod memory;
pub mod metrics;
pub mod redis_store;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryRecordStore;
pub use redis_store::{RedisRecordStore, RedisStoreConfig};
pub use store::RecordStore;
