//! Redis hash backed record store.
//!
//! Each record lives in one hash at `<prefix>:<record_id>`. Scalar fields
//! are stored as strings, details as a JSON blob and timestamps as RFC 3339.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use tracing::{debug, info};
use vsum_models::{RecordId, RecordStatus, RecordUpdate, VideoDetails, VideoRecord};

use crate::error::{StoreError, StoreResult};
use crate::metrics::{record_operation, record_retry_rejected};
use crate::store::RecordStore;

/// Default key prefix.
pub const DEFAULT_KEY_PREFIX: &str = "vsum:record";

/// Compare-and-set from any failed status to `processing`.
///
/// Returns -1 when the hash does not exist, 0 when the status is not a
/// failure status, 1 when the reset happened.
const RESET_FOR_RETRY_LUA: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
  return -1
end
if status == 'failed_video_processing'
  or status == 'failed_audio_processing'
  or status == 'failed_transcription' then
  redis.call('HSET', KEYS[1], 'status', 'processing', 'updated_at', ARGV[1])
  redis.call('HDEL', KEYS[1], 'transcription', 'summary', 'detected_language')
  return 1
end
return 0
"#;

/// Partial update of an existing hash.
///
/// ARGV is a flat list of field/value pairs. Returns 0 without writing when
/// the hash does not exist, 1 after the update.
const UPDATE_IF_EXISTS_LUA: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV))
return 1
"#;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    pub redis_url: String,
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl RedisStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("RECORD_KEY_PREFIX")
                .unwrap_or_else(|_| DEFAULT_KEY_PREFIX.to_string()),
        }
    }
}

/// [`RecordStore`] backed by Redis hashes.
pub struct RedisRecordStore {
    client: redis::Client,
    config: RedisStoreConfig,
    reset_script: redis::Script,
    update_script: redis::Script,
}

impl RedisRecordStore {
    pub fn new(config: RedisStoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            reset_script: redis::Script::new(RESET_FOR_RETRY_LUA),
            update_script: redis::Script::new(UPDATE_IF_EXISTS_LUA),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(RedisStoreConfig::from_env())
    }

    fn key(&self, id: &RecordId) -> String {
        format!("{}:{}", self.config.key_prefix, id)
    }

    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> StoreResult<T>
    where
        F: std::future::Future<Output = StoreResult<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        record_operation(
            operation,
            result.is_ok(),
            started.elapsed().as_secs_f64() * 1000.0,
        );
        result
    }
}

#[async_trait]
impl RecordStore for RedisRecordStore {
    async fn create(&self, record: &VideoRecord) -> StoreResult<()> {
        self.timed("create", async {
            let key = self.key(&record.id);
            let mut conn = self.client.get_multiplexed_async_connection().await?;

            let claimed: bool = conn.hset_nx(&key, "id", record.id.as_str()).await?;
            if !claimed {
                return Err(StoreError::AlreadyExists(record.id.to_string()));
            }

            let fields = record_to_fields(record)?;
            conn.hset_multiple::<_, _, _, ()>(&key, &fields).await?;

            info!(record_id = %record.id, "Created record");
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &RecordId) -> StoreResult<Option<VideoRecord>> {
        self.timed("get", async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let fields: HashMap<String, String> = conn.hgetall(self.key(id)).await?;

            if fields.is_empty() {
                return Ok(None);
            }
            record_from_fields(id, &fields).map(Some)
        })
        .await
    }

    async fn update(&self, id: &RecordId, update: &RecordUpdate) -> StoreResult<()> {
        self.timed("update", async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;

            let args = update_script_args(update, Utc::now());
            let mut invocation = self.update_script.key(self.key(id));
            for arg in &args {
                invocation.arg(arg);
            }
            let updated: i64 = invocation.invoke_async(&mut conn).await?;

            // A purged record must not come back as a partial hash.
            if updated == 0 {
                return Err(StoreError::not_found(id.as_str()));
            }

            debug!(record_id = %id, fields = args.len() / 2, "Updated record");
            Ok(())
        })
        .await
    }

    async fn reset_for_retry(&self, id: &RecordId) -> StoreResult<bool> {
        self.timed("reset_for_retry", async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let result: i64 = self
                .reset_script
                .key(self.key(id))
                .arg(Utc::now().to_rfc3339())
                .invoke_async(&mut conn)
                .await?;

            match result {
                1 => Ok(true),
                0 => {
                    record_retry_rejected();
                    Ok(false)
                }
                _ => Err(StoreError::not_found(id.as_str())),
            }
        })
        .await
    }
}

/// Hash fields for a full record. `None` fields are omitted.
pub fn record_to_fields(record: &VideoRecord) -> StoreResult<Vec<(&'static str, String)>> {
    let mut fields = vec![
        ("id", record.id.to_string()),
        ("owner_id", record.owner_id.clone()),
        ("source_url", record.source_url.clone()),
        ("external_media_id", record.external_media_id.clone()),
        ("status", record.status.as_str().to_string()),
        ("details", serde_json::to_string(&record.details)?),
        ("chat_session_id", record.chat_session_id.clone()),
        ("created_at", record.created_at.to_rfc3339()),
        ("updated_at", record.updated_at.to_rfc3339()),
    ];

    if let Some(ref transcription) = record.transcription {
        fields.push(("transcription", transcription.clone()));
    }
    if let Some(ref summary) = record.summary {
        fields.push(("summary", summary.clone()));
    }
    if let Some(ref language) = record.detected_language {
        fields.push(("detected_language", language.clone()));
    }
    if let Some(deleted_at) = record.deleted_at {
        fields.push(("deleted_at", deleted_at.to_rfc3339()));
    }

    Ok(fields)
}

/// Hash fields written for a partial update, always including `updated_at`.
pub fn update_to_fields(update: &RecordUpdate, now: DateTime<Utc>) -> Vec<(&'static str, String)> {
    let mut fields = Vec::with_capacity(5);

    if let Some(status) = update.status {
        fields.push(("status", status.as_str().to_string()));
    }
    if let Some(ref transcription) = update.transcription {
        fields.push(("transcription", transcription.clone()));
    }
    if let Some(ref summary) = update.summary {
        fields.push(("summary", summary.clone()));
    }
    if let Some(ref language) = update.detected_language {
        fields.push(("detected_language", language.clone()));
    }
    fields.push(("updated_at", now.to_rfc3339()));

    fields
}

/// Flattened field/value pairs passed to the update script.
pub fn update_script_args(update: &RecordUpdate, now: DateTime<Utc>) -> Vec<String> {
    update_to_fields(update, now)
        .into_iter()
        .flat_map(|(field, value)| [field.to_string(), value])
        .collect()
}

/// Rebuild a record from its hash fields.
pub fn record_from_fields(
    id: &RecordId,
    fields: &HashMap<String, String>,
) -> StoreResult<VideoRecord> {
    let required = |name: &str| {
        fields
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::invalid(id.as_str(), format!("missing field {}", name)))
    };
    let timestamp = |name: &str| -> StoreResult<DateTime<Utc>> {
        let raw = required(name)?;
        parse_timestamp(id, name, &raw)
    };

    let status = required("status")?
        .parse::<RecordStatus>()
        .map_err(|e| StoreError::invalid(id.as_str(), e.to_string()))?;

    let details = match fields.get("details") {
        Some(raw) => serde_json::from_str::<VideoDetails>(raw)?,
        None => VideoDetails::default(),
    };

    let deleted_at = match fields.get("deleted_at") {
        Some(raw) => Some(parse_timestamp(id, "deleted_at", raw)?),
        None => None,
    };

    Ok(VideoRecord {
        id: id.clone(),
        owner_id: required("owner_id")?,
        source_url: required("source_url")?,
        external_media_id: required("external_media_id")?,
        status,
        details,
        transcription: fields.get("transcription").cloned(),
        summary: fields.get("summary").cloned(),
        detected_language: fields.get("detected_language").cloned(),
        chat_session_id: required("chat_session_id")?,
        created_at: timestamp("created_at")?,
        updated_at: timestamp("updated_at")?,
        deleted_at,
    })
}

fn parse_timestamp(id: &RecordId, name: &str, raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::invalid(id.as_str(), format!("bad {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> VideoRecord {
        VideoRecord::new(
            "user-1",
            "https://platform.example/watch?v=ABCDEFGHIJK",
            "ABCDEFGHIJK",
            VideoDetails {
                title: Some("A talk".to_string()),
                genre: Some("Education".to_string()),
                ..Default::default()
            },
        )
    }

    fn to_map(fields: Vec<(&'static str, String)>) -> HashMap<String, String> {
        fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_fields_rebuild_record() {
        let mut record = record();
        record.status = RecordStatus::Completed;
        record.transcription = Some("hello".to_string());
        record.summary = Some("greeting".to_string());
        record.detected_language = Some("English".to_string());

        let map = to_map(record_to_fields(&record).unwrap());
        let rebuilt = record_from_fields(&record.id, &map).unwrap();

        assert_eq!(rebuilt, record);
    }

    #[test]
    fn test_blank_result_fields_are_omitted() {
        let fields = record_to_fields(&record()).unwrap();
        let names: Vec<&str> = fields.iter().map(|(k, _)| *k).collect();

        assert!(names.contains(&"status"));
        assert!(!names.contains(&"transcription"));
        assert!(!names.contains(&"summary"));
        assert!(!names.contains(&"deleted_at"));
    }

    #[test]
    fn test_update_writes_only_present_fields() {
        let now = Utc::now();
        let fields = update_to_fields(
            &RecordUpdate::status(RecordStatus::FailedTranscription),
            now,
        );

        assert_eq!(
            fields,
            vec![
                ("status", "failed_transcription".to_string()),
                ("updated_at", now.to_rfc3339()),
            ]
        );
    }

    #[test]
    fn test_update_args_are_field_value_pairs() {
        let now = Utc::now();
        let update = RecordUpdate::completed("hello there", "a greeting", "English");
        let args = update_script_args(&update, now);
        let updated_at = now.to_rfc3339();

        assert_eq!(
            args,
            vec![
                "status",
                "completed",
                "transcription",
                "hello there",
                "summary",
                "a greeting",
                "detected_language",
                "English",
                "updated_at",
                updated_at.as_str(),
            ]
        );
    }

    #[test]
    fn test_update_script_guards_existence_before_write() {
        let exists = UPDATE_IF_EXISTS_LUA.find("EXISTS").unwrap();
        let write = UPDATE_IF_EXISTS_LUA.find("HSET").unwrap();
        assert!(exists < write);
        assert!(!UPDATE_IF_EXISTS_LUA.contains("HSETNX"));
    }

    #[test]
    fn test_missing_required_field() {
        let record = record();
        let mut map = to_map(record_to_fields(&record).unwrap());
        map.remove("owner_id");

        let err = record_from_fields(&record.id, &map).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord { .. }));
    }

    #[test]
    fn test_unknown_status_is_invalid() {
        let record = record();
        let mut map = to_map(record_to_fields(&record).unwrap());
        map.insert("status".to_string(), "exploded".to_string());

        assert!(record_from_fields(&record.id, &map).is_err());
    }

    #[test]
    fn test_key_layout() {
        let store = RedisRecordStore::new(RedisStoreConfig::default()).unwrap();
        assert_eq!(store.key(&RecordId::from("rec-1")), "vsum:record:rec-1");
    }
}
