//! In-memory implementation of both storage traits.
//!
//! Backs the test suites and local development without a Redis or Postgres
//! at hand. TTLs are recorded but never enforced; nothing here outlives the
//! process anyway.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use logwarden_model::{LogRecord, parse_timestamp};

use crate::error::Result;
use crate::storage::{Cache, LogStore};

#[derive(Debug, Default)]
pub struct MemoryStorage {
    strings: Mutex<HashMap<String, Vec<u8>>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    sets: Mutex<HashMap<String, BTreeSet<String>>>,
    ttls: Mutex<HashMap<String, Duration>>,
    records: Mutex<HashMap<String, LogRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted relational records (test helper).
    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// TTL recorded for a key, if any was ever set (test helper).
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.ttls.lock().unwrap().get(key).copied()
    }
}

#[async_trait]
impl Cache for MemoryStorage {
    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.strings
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        if let Some(ttl) = ttl {
            self.ttls.lock().unwrap().insert(key.to_string(), ttl);
        }
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.strings.lock().unwrap().get(key).cloned())
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
        let mut hashes = self.hashes.lock().unwrap();
        let hash = hashes.entry(key.to_string()).or_default();
        for (name, value) in fields {
            hash.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self
            .hashes
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.sets
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        if let Some(set) = self.sets.lock().unwrap().get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .lock()
            .unwrap()
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.ttls.lock().unwrap().insert(key.to_string(), ttl);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.strings.lock().unwrap().contains_key(key)
            || self.hashes.lock().unwrap().contains_key(key)
            || self.sets.lock().unwrap().contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.strings.lock().unwrap().remove(key);
        self.hashes.lock().unwrap().remove(key);
        self.sets.lock().unwrap().remove(key);
        self.ttls.lock().unwrap().remove(key);
        Ok(())
    }
}

#[async_trait]
impl LogStore for MemoryStorage {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn save_record(&self, record: &LogRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_record(&self, id: &str) -> Result<Option<LogRecord>> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<LogRecord>> {
        let records = self.records.lock().unwrap();
        let mut matching: Vec<LogRecord> = records
            .values()
            .filter(|record| {
                parse_timestamp(&record.timestamp)
                    .map(|ts| {
                        let ts = ts.and_utc();
                        ts >= start && ts <= end
                    })
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}
