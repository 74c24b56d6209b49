use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use logwarden_model::{LogRecord, parse_timestamp};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::storage::LogStore;

/// Postgres-backed relational store for parsed records and alerts.
///
/// The schema is the normalized two-table pair: `log_entries` holds the
/// indexed core columns, `log_fields` one row per extension field with a
/// cascading foreign key back to the entry.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS log_entries (
        id VARCHAR(36) PRIMARY KEY,
        timestamp TIMESTAMP NOT NULL,
        level VARCHAR(20) NOT NULL,
        source VARCHAR(100) NOT NULL,
        message TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_log_entries_timestamp ON log_entries (timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_log_entries_level ON log_entries (level)",
    "CREATE INDEX IF NOT EXISTS idx_log_entries_source ON log_entries (source)",
    "CREATE INDEX IF NOT EXISTS idx_log_entries_message ON log_entries
        USING GIN (to_tsvector('english', message))",
    "CREATE TABLE IF NOT EXISTS log_fields (
        log_id VARCHAR(36) NOT NULL REFERENCES log_entries(id) ON DELETE CASCADE,
        field_name VARCHAR(50) NOT NULL,
        field_value TEXT,
        PRIMARY KEY (log_id, field_name)
    )",
    "CREATE INDEX IF NOT EXISTS idx_log_fields_field_name ON log_fields (field_name)",
];

impl PostgresStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("Connecting to Postgres store");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| PipelineError::Storage(format!("Failed to connect to Postgres: {e}")))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Canonical-string timestamps parse into the DATETIME column; anything
    /// malformed lands as "now" rather than failing the write.
    fn entry_timestamp(record: &LogRecord) -> NaiveDateTime {
        parse_timestamp(&record.timestamp).unwrap_or_else(|| Utc::now().naive_utc())
    }
}

#[async_trait]
impl LogStore for PostgresStore {
    async fn initialize(&self) -> Result<()> {
        info!("Initializing log_entries / log_fields schema");

        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| PipelineError::Storage(format!("Schema init failed: {e}")))?;
        }
        Ok(())
    }

    async fn save_record(&self, record: &LogRecord) -> Result<()> {
        debug!("Persisting record {}", record.id);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PipelineError::Storage(format!("Failed to start transaction: {e}")))?;

        sqlx::query(
            "INSERT INTO log_entries (id, timestamp, level, source, message)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE SET
                timestamp = EXCLUDED.timestamp,
                level = EXCLUDED.level,
                source = EXCLUDED.source,
                message = EXCLUDED.message",
        )
        .bind(&record.id)
        .bind(Self::entry_timestamp(record))
        .bind(&record.level)
        .bind(&record.source)
        .bind(&record.message)
        .execute(&mut *tx)
        .await
        .map_err(|e| PipelineError::Storage(format!("Failed to save log entry: {e}")))?;

        // Rewriting the field set keeps updates (alert saves reuse the id)
        // consistent with the entry row.
        sqlx::query("DELETE FROM log_fields WHERE log_id = $1")
            .bind(&record.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| PipelineError::Storage(format!("Failed to clear log fields: {e}")))?;

        for (name, value) in &record.fields {
            sqlx::query(
                "INSERT INTO log_fields (log_id, field_name, field_value) VALUES ($1, $2, $3)",
            )
            .bind(&record.id)
            .bind(name)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(|e| PipelineError::Storage(format!("Failed to save log field: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| PipelineError::Storage(format!("Failed to commit transaction: {e}")))?;

        Ok(())
    }

    async fn get_record(&self, id: &str) -> Result<Option<LogRecord>> {
        let row = sqlx::query(
            "SELECT id, timestamp, level, source, message FROM log_entries WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::Storage(format!("Failed to fetch log entry: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut record = record_from_row(&row)?;

        let field_rows =
            sqlx::query("SELECT field_name, field_value FROM log_fields WHERE log_id = $1")
                .bind(id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| PipelineError::Storage(format!("Failed to fetch log fields: {e}")))?;

        for field in field_rows {
            let name: String = field
                .try_get("field_name")
                .map_err(|e| PipelineError::Storage(e.to_string()))?;
            let value: Option<String> = field
                .try_get("field_value")
                .map_err(|e| PipelineError::Storage(e.to_string()))?;
            record.fields.insert(name, value.unwrap_or_default());
        }

        Ok(Some(record))
    }

    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<LogRecord>> {
        let rows = sqlx::query(
            "SELECT id, timestamp, level, source, message FROM log_entries
             WHERE timestamp >= $1 AND timestamp <= $2
             ORDER BY timestamp DESC
             LIMIT $3 OFFSET $4",
        )
        .bind(start.naive_utc())
        .bind(end.naive_utc())
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::Storage(format!("Failed to query log entries: {e}")))?;

        let mut records: Vec<LogRecord> = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>>>()?;

        if records.is_empty() {
            return Ok(records);
        }

        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let field_rows = sqlx::query(
            "SELECT log_id, field_name, field_value FROM log_fields WHERE log_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::Storage(format!("Failed to fetch log fields: {e}")))?;

        let mut fields_by_id: HashMap<String, HashMap<String, String>> = HashMap::new();
        for field in field_rows {
            let log_id: String = field
                .try_get("log_id")
                .map_err(|e| PipelineError::Storage(e.to_string()))?;
            let name: String = field
                .try_get("field_name")
                .map_err(|e| PipelineError::Storage(e.to_string()))?;
            let value: Option<String> = field
                .try_get("field_value")
                .map_err(|e| PipelineError::Storage(e.to_string()))?;
            fields_by_id
                .entry(log_id)
                .or_default()
                .insert(name, value.unwrap_or_default());
        }

        for record in &mut records {
            if let Some(fields) = fields_by_id.remove(&record.id) {
                record.fields = fields;
            }
        }

        Ok(records)
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<LogRecord> {
    let timestamp: NaiveDateTime = row
        .try_get("timestamp")
        .map_err(|e| PipelineError::Storage(e.to_string()))?;

    Ok(LogRecord {
        id: row
            .try_get("id")
            .map_err(|e| PipelineError::Storage(e.to_string()))?,
        timestamp: logwarden_model::format_timestamp(timestamp.and_utc()),
        level: row
            .try_get("level")
            .map_err(|e| PipelineError::Storage(e.to_string()))?,
        source: row
            .try_get("source")
            .map_err(|e| PipelineError::Storage(e.to_string()))?,
        message: row
            .try_get("message")
            .map_err(|e| PipelineError::Storage(e.to_string()))?,
        fields: HashMap::new(),
    })
}
