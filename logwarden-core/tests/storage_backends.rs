//! Tests against live storage backends. Skipped unless `DATABASE_URL` /
//! `REDIS_URL` point at reachable services; the rest of the suite runs
//! against the in-memory double.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use logwarden_core::storage::{Cache, CacheKeys, LogStore, PostgresStore, RedisCache};
use logwarden_model::{LogRecord, format_timestamp};
use uuid::Uuid;

fn test_record(id: &str) -> LogRecord {
    LogRecord {
        id: id.into(),
        timestamp: format_timestamp(Utc::now()),
        level: "WARNING".into(),
        source: "storage-test".into(),
        message: "live backend round trip".into(),
        fields: HashMap::from([
            ("alert_name".to_string(), "StorageTest".to_string()),
            ("k".to_string(), "v".to_string()),
        ]),
    }
}

#[tokio::test]
async fn postgres_round_trips_records_and_fields() {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping live Postgres test");
        return;
    };

    let store = PostgresStore::connect(&url, 2).await.unwrap();
    store.initialize().await.unwrap();

    let id = Uuid::new_v4().to_string();
    let record = test_record(&id);
    store.save_record(&record).await.unwrap();

    let loaded = store.get_record(&id).await.unwrap().unwrap();
    assert_eq!(loaded.level, "WARNING");
    assert_eq!(loaded.message, "live backend round trip");
    assert_eq!(loaded.fields["k"], "v");

    // Saving again under the same id updates instead of duplicating.
    let mut updated = record.clone();
    updated.message = "updated".into();
    updated.fields.remove("k");
    store.save_record(&updated).await.unwrap();

    let loaded = store.get_record(&id).await.unwrap().unwrap();
    assert_eq!(loaded.message, "updated");
    assert!(!loaded.fields.contains_key("k"));

    let recent = store
        .query_range(
            Utc::now() - chrono::Duration::minutes(5),
            Utc::now() + chrono::Duration::minutes(5),
            100,
            0,
        )
        .await
        .unwrap();
    assert!(recent.iter().any(|r| r.id == id));
}

#[tokio::test]
async fn redis_supports_the_full_op_set() {
    let Ok(url) = std::env::var("REDIS_URL") else {
        eprintln!("REDIS_URL not set, skipping live Redis test");
        return;
    };

    let cache = RedisCache::connect(&url).await.unwrap();
    let id = Uuid::new_v4().to_string();

    let key = CacheKeys::raw_log(&id);
    cache
        .set_bytes(&key, b"payload", Some(Duration::from_secs(60)))
        .await
        .unwrap();
    assert_eq!(cache.get_bytes(&key).await.unwrap().unwrap(), b"payload");
    assert!(cache.exists(&key).await.unwrap());

    let info_key = CacheKeys::raw_log_info(&id);
    cache
        .hash_set(
            &info_key,
            &[("source".to_string(), "storage-test".to_string())],
        )
        .await
        .unwrap();
    cache.expire(&info_key, Duration::from_secs(60)).await.unwrap();
    let hash = cache.hash_get_all(&info_key).await.unwrap();
    assert_eq!(hash["source"], "storage-test");

    let set_key = format!("storage-test:{id}");
    cache.set_add(&set_key, &id).await.unwrap();
    assert_eq!(cache.set_members(&set_key).await.unwrap(), vec![id.clone()]);
    cache.set_remove(&set_key, &id).await.unwrap();
    assert!(cache.set_members(&set_key).await.unwrap().is_empty());

    cache.delete(&key).await.unwrap();
    assert!(!cache.exists(&key).await.unwrap());
    cache.delete(&info_key).await.unwrap();
    cache.delete(&set_key).await.unwrap();
}
