use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use logwarden_model::AlertStatus;
use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::storage::Cache;

/// Redis-backed cache.
///
/// The connection manager multiplexes one connection and reconnects
/// transparently when it drops, so callers never see a dead handle.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

fn storage_err(op: &str) -> impl FnOnce(redis::RedisError) -> PipelineError + '_ {
    move |e| PipelineError::Storage(format!("Redis {op} failed: {e}"))
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis cache at {}", redis_url);

        let client = redis::Client::open(redis_url)
            .map_err(|e| PipelineError::Storage(format!("Failed to create Redis client: {e}")))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| PipelineError::Storage(format!("Failed to connect to Redis: {e}")))?;

        info!("Successfully connected to Redis cache");

        Ok(Self { conn })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        debug!("Cache SET: {} ({} bytes, TTL: {:?})", key, value.len(), ttl);

        let mut conn = self.conn.clone();
        if let Some(ttl) = ttl {
            conn.set_ex::<_, _, ()>(key, value, ttl.as_secs())
                .await
                .map_err(storage_err("SETEX"))?;
        } else {
            conn.set::<_, _, ()>(key, value)
                .await
                .map_err(storage_err("SET"))?;
        }
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        debug!("Cache GET: {}", key);

        let mut conn = self.conn.clone();
        let data: Option<Vec<u8>> = conn.get(key).await.map_err(storage_err("GET"))?;
        Ok(data)
    }

    async fn set_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.set_bytes(key, value.as_bytes(), ttl).await
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .get_bytes(key)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        debug!("Cache HSET: {} ({} fields)", key, fields.len());

        let mut conn = self.conn.clone();
        conn.hset_multiple::<_, _, _, ()>(key, fields)
            .await
            .map_err(storage_err("HSET"))?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> =
            conn.hgetall(key).await.map_err(storage_err("HGETALL"))?;
        Ok(fields)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(key, member)
            .await
            .map_err(storage_err("SADD"))?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(key, member)
            .await
            .map_err(storage_err("SREM"))?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(key).await.map_err(storage_err("SMEMBERS"))?;
        Ok(members)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(key, ttl.as_secs() as i64)
            .await
            .map_err(storage_err("EXPIRE"))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await.map_err(storage_err("EXISTS"))?;
        Ok(exists)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        debug!("Cache DELETE: {}", key);

        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(storage_err("DEL"))?;
        Ok(())
    }
}

/// Builders for every cache key the pipeline writes.
#[derive(Debug, Clone, Copy)]
pub struct CacheKeys;

impl CacheKeys {
    pub fn raw_log(id: &str) -> String {
        format!("raw_log:{id}")
    }

    pub fn raw_log_info(id: &str) -> String {
        format!("raw_log:{id}:info")
    }

    pub fn analysis_result(id: &str) -> String {
        format!("analysis_result:{id}")
    }

    pub fn recent_analysis_results() -> String {
        "recent_analysis_results".to_string()
    }

    pub fn alert(id: &str) -> String {
        format!("alert:{id}")
    }

    pub fn alerts_by_status(status: AlertStatus) -> String {
        format!("alerts:{status}")
    }

    /// Convenience set holding every currently ACTIVE alert id.
    pub fn alerts_active() -> String {
        "alerts:active".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes() {
        assert_eq!(CacheKeys::raw_log("abc"), "raw_log:abc");
        assert_eq!(CacheKeys::raw_log_info("abc"), "raw_log:abc:info");
        assert_eq!(CacheKeys::analysis_result("abc"), "analysis_result:abc");
        assert_eq!(CacheKeys::alert("x"), "alert:x");
        assert_eq!(
            CacheKeys::alerts_by_status(AlertStatus::Resolved),
            "alerts:RESOLVED"
        );
        assert_eq!(CacheKeys::alerts_active(), "alerts:active");
    }
}
