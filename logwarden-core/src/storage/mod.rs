//! Storage contracts shared by every subsystem.
//!
//! Two backends: a key/value cache (Redis) for raw payloads, analysis
//! results, and live alerts, and a relational store (Postgres) holding the
//! normalized `log_entries` / `log_fields` pair. Both sit behind async
//! traits so the engine can run against the in-memory double in tests.

pub mod cache;
pub mod database;
pub mod memory;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use logwarden_model::LogRecord;

use crate::error::Result;

pub use cache::{CacheKeys, RedisCache};
pub use database::PostgresStore;
pub use memory::MemoryStorage;

/// Retention for archived raw payloads and persisted alerts.
pub const RAW_LOG_TTL: Duration = Duration::from_secs(86_400 * 7);
pub const ALERT_TTL: Duration = Duration::from_secs(86_400 * 7);
/// Retention for per-rule analysis results.
pub const ANALYSIS_RESULT_TTL: Duration = Duration::from_secs(86_400);

/// Key/value cache operations used by the pipeline.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<()>;
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn set_add(&self, key: &str, member: &str) -> Result<()>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<()>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Relational store operations over the `log_entries` / `log_fields` pair.
///
/// Alerts reuse the same tables with `alert_data` / `alert_status` /
/// `alert_name` rows in `log_fields`, so there is no separate alert schema.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Create tables and indexes idempotently. Callers refuse to start when
    /// this fails.
    async fn initialize(&self) -> Result<()>;

    /// Insert or update one record transactionally, fields included.
    async fn save_record(&self, record: &LogRecord) -> Result<()>;

    async fn get_record(&self, id: &str) -> Result<Option<LogRecord>>;

    /// Records whose timestamp falls in `[start, end]`, newest first.
    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<LogRecord>>;
}
