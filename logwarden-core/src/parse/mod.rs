//! Frame parsing: turning raw [`LogData`] payloads into structured
//! [`LogRecord`]s.
//!
//! Parsers are tried in registration order; the first whose `can_parse`
//! accepts wins. When none accepts, the first parser runs anyway, and with
//! no parsers at all a minimal record is synthesized. Parsers never fail:
//! malformed input degrades to an ERROR-level record carrying the parser
//! error and the raw content.

pub mod json;
pub mod pattern;
pub mod text;

use std::str::FromStr;
use std::sync::Arc;

use logwarden_model::{Level, LogData, LogRecord, parse_timestamp};

use crate::compress;

pub use json::JsonParser;
pub use pattern::RegexParser;
pub use text::TextParser;

pub trait LogParser: Send + Sync {
    fn name(&self) -> &str;
    fn can_parse(&self, data: &LogData) -> bool;
    fn parse(&self, data: &LogData) -> LogRecord;
}

/// Select a parser for `data` and run it.
pub fn parse_log_data(parsers: &[Arc<dyn LogParser>], data: &LogData) -> LogRecord {
    for parser in parsers {
        if parser.can_parse(data) {
            return finalize(parser.parse(data));
        }
    }

    if let Some(first) = parsers.first() {
        return finalize(first.parse(data));
    }

    // No parsers registered: synthesize the minimal record.
    let mut record = LogRecord::from_data(data);
    record.level = Level::Info.as_str().to_string();
    record.message = match compress::payload_text(&data.payload, data.compressed) {
        Ok(text) => text,
        Err(e) => {
            record.level = Level::Error.as_str().to_string();
            format!("{e}")
        }
    };
    attach_metadata(&mut record, data);
    finalize(record)
}

/// Copy transport metadata into the record under the `metadata.` prefix.
pub(crate) fn attach_metadata(record: &mut LogRecord, data: &LogData) {
    for (key, value) in &data.metadata {
        record
            .fields
            .insert(format!("metadata.{key}"), value.clone());
    }
}

/// Normalize the invariants every record must satisfy after parse: a
/// non-empty id, a canonical level string, and a canonical timestamp.
pub(crate) fn finalize(mut record: LogRecord) -> LogRecord {
    record.ensure_id();
    record.level = Level::from_str(&record.level)
        .unwrap_or(Level::Info)
        .as_str()
        .to_string();
    record
}

/// Assign one extracted value to its mapped destination: the five core
/// record members get set directly, everything else lands in `fields`.
///
/// Extracted timestamps only replace the arrival timestamp when they parse
/// in the canonical format; anything else is preserved as a field so the
/// stored timestamp column stays well-formed.
pub(crate) fn assign_field(record: &mut LogRecord, field: &str, value: String) {
    match field {
        "id" => record.id = value,
        "level" => record.level = value,
        "message" => record.message = value,
        "source" => record.source = value,
        "timestamp" => {
            if parse_timestamp(&value).is_some() {
                record.timestamp = value;
            } else {
                record.fields.insert("timestamp".to_string(), value);
            }
        }
        other => {
            record.fields.insert(other.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_parsers_synthesizes_minimal_record() {
        let mut data = LogData::new("id-1", b"plain line".to_vec(), "test");
        data.metadata.insert("host".into(), "web-1".into());

        let record = parse_log_data(&[], &data);
        assert_eq!(record.level, "INFO");
        assert_eq!(record.message, "plain line");
        assert_eq!(record.fields["metadata.host"], "web-1");
    }

    #[test]
    fn finalize_normalizes_level_and_id() {
        let record = finalize(LogRecord {
            level: "warn".into(),
            ..LogRecord::default()
        });
        assert_eq!(record.level, "WARNING");
        assert!(!record.id.is_empty());
    }

    #[test]
    fn assign_field_guards_the_timestamp_column() {
        let mut record = LogRecord::default();
        record.timestamp = "2024-03-09 10:00:00".into();

        assign_field(&mut record, "timestamp", "yesterday at noon".into());
        assert_eq!(record.timestamp, "2024-03-09 10:00:00");
        assert_eq!(record.fields["timestamp"], "yesterday at noon");

        assign_field(&mut record, "timestamp", "2024-03-10 11:30:00".into());
        assert_eq!(record.timestamp, "2024-03-10 11:30:00");
    }
}
