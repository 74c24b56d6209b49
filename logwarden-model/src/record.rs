use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::level::Level;
use crate::time::format_timestamp;

/// One log line inside the collector, before batching.
///
/// `content` may hold the zlib-compressed form of the original line; the
/// `compressed` flag records which.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub content: Vec<u8>,
    pub level: Level,
    pub timestamp: DateTime<Utc>,
    pub compressed: bool,
}

impl LogEntry {
    pub fn new(content: impl Into<Vec<u8>>, level: Level) -> Self {
        Self {
            content: content.into(),
            level,
            timestamp: Utc::now(),
            compressed: false,
        }
    }
}

/// Raw payload as the processor receives it, one per frame.
///
/// Created on frame receipt and dropped after archiving and forwarding; the
/// id is assigned on arrival (`tcp-<connId>-<seq>`) when the producer did not
/// supply one.
#[derive(Debug, Clone)]
pub struct LogData {
    pub id: String,
    pub payload: Vec<u8>,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub compressed: bool,
    pub metadata: HashMap<String, String>,
}

impl LogData {
    pub fn new(id: impl Into<String>, payload: impl Into<Vec<u8>>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            source: source.into(),
            timestamp: Utc::now(),
            compressed: false,
            metadata: HashMap::new(),
        }
    }
}

/// Structured form of a parsed frame. Immutable after parse.
///
/// `timestamp` is already in the canonical `YYYY-MM-DD hh:mm:ss` form and
/// `level` is uppercase; both invariants are enforced at parse time, not
/// here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: String,
    pub timestamp: String,
    pub level: String,
    pub source: String,
    pub message: String,
    #[serde(default)]
    pub fields: HashMap<String, String>,
}

impl LogRecord {
    /// Skeleton record carrying the transport-level attributes of `data`.
    /// Parsers fill in `level`, `message`, and `fields`.
    pub fn from_data(data: &LogData) -> Self {
        Self {
            id: data.id.clone(),
            timestamp: format_timestamp(data.timestamp),
            source: data.source.clone(),
            ..Self::default()
        }
    }

    /// Every record entering the analyzer must carry a non-empty id; frames
    /// that arrived without one get a generated UUID.
    pub fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
    }
}

/// Key/value map produced by evaluating one rule against one record.
///
/// Well-known keys: `matched`, `rule`, `group`, plus rule-specific extras
/// such as `match_count`, `score`, `matched_keywords`, or regex captures.
pub type AnalysisResult = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_data_copies_transport_attributes() {
        let mut data = LogData::new("tcp-1-0", b"payload".to_vec(), "10.0.0.5:41234");
        data.metadata.insert("agent".into(), "test".into());

        let record = LogRecord::from_data(&data);
        assert_eq!(record.id, "tcp-1-0");
        assert_eq!(record.source, "10.0.0.5:41234");
        assert_eq!(record.timestamp.len(), 19);
        assert!(record.message.is_empty());
    }

    #[test]
    fn ensure_id_only_fills_empty() {
        let mut record = LogRecord::default();
        record.ensure_id();
        assert!(!record.id.is_empty());

        let generated = record.id.clone();
        record.ensure_id();
        assert_eq!(record.id, generated);
    }
}
