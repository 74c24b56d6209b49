use std::collections::HashMap;

use logwarden_model::{LogData, LogRecord};
use serde_json::Value;

use crate::compress;
use crate::parse::{LogParser, assign_field, attach_metadata};

/// Parser for one-JSON-object-per-frame payloads.
///
/// `field_map` maps JSON keys to record fields; unmapped top-level keys are
/// preserved as `json.<key>` fields holding the JSON text of the value.
#[derive(Debug, Clone)]
pub struct JsonParser {
    name: String,
    field_map: HashMap<String, String>,
}

impl JsonParser {
    pub fn new(name: impl Into<String>, field_map: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            field_map,
        }
    }

    /// The identity mapping over the standard frame fields.
    pub fn standard() -> Self {
        let map = ["id", "message", "level", "timestamp", "source"]
            .into_iter()
            .map(|f| (f.to_string(), f.to_string()))
            .collect();
        Self::new("JsonParser", map)
    }
}

/// JSON string values map to their inner text; everything else keeps its
/// JSON rendering.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl LogParser for JsonParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_parse(&self, data: &LogData) -> bool {
        match compress::payload_text(&data.payload, data.compressed) {
            Ok(text) => serde_json::from_str::<Value>(&text).is_ok(),
            Err(_) => false,
        }
    }

    fn parse(&self, data: &LogData) -> LogRecord {
        let mut record = LogRecord::from_data(data);

        let content = match compress::payload_text(&data.payload, data.compressed) {
            Ok(text) => text,
            Err(e) => {
                record.level = "ERROR".to_string();
                record.message = format!("{e}");
                attach_metadata(&mut record, data);
                return record;
            }
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(object)) => {
                for (json_field, record_field) in &self.field_map {
                    if let Some(value) = object.get(json_field) {
                        assign_field(&mut record, record_field, value_text(value));
                    }
                }

                if record.level.is_empty() {
                    record.level = "INFO".to_string();
                }
                if record.message.is_empty() {
                    record.message = content.clone();
                }

                // Unmapped keys survive as json.<key> fields.
                for (key, value) in &object {
                    if !self.field_map.contains_key(key) {
                        record.fields.insert(format!("json.{key}"), value.to_string());
                    }
                }
            }
            Ok(other) => {
                // Valid JSON but not an object; keep it whole.
                record.level = "INFO".to_string();
                record.message = other.to_string();
            }
            Err(e) => {
                record.level = "ERROR".to_string();
                record.message = format!("JSON parse error: {e} - {content}");
            }
        }

        attach_metadata(&mut record, data);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_log_data;
    use std::sync::Arc;

    fn data(payload: &str) -> LogData {
        LogData::new("rec-1", payload.as_bytes().to_vec(), "10.0.0.1:5000")
    }

    #[test]
    fn remaps_fields_and_keeps_extras() {
        let map = HashMap::from([
            ("msg".to_string(), "message".to_string()),
            ("lvl".to_string(), "level".to_string()),
        ]);
        let parser = JsonParser::new("remap", map);

        let record = parser.parse(&data(r#"{"msg":"hi","lvl":"WARNING","extra":42}"#));
        assert_eq!(record.level, "WARNING");
        assert_eq!(record.message, "hi");
        assert_eq!(record.fields["json.extra"], "42");
    }

    #[test]
    fn string_extras_keep_their_json_rendering() {
        let parser = JsonParser::standard();
        let record = parser.parse(&data(r#"{"message":"m","tag":"blue"}"#));
        assert_eq!(record.fields["json.tag"], "\"blue\"");
    }

    #[test]
    fn frame_round_trip_through_the_registry() {
        let parsers: Vec<Arc<dyn LogParser>> = vec![Arc::new(JsonParser::standard())];
        let frame = r#"{"id":"abc","timestamp":"2024-03-09 10:00:00","level":"ERROR","source":"app","message":"boom"}"#;

        let record = parse_log_data(&parsers, &data(frame));
        assert_eq!(record.id, "abc");
        assert_eq!(record.timestamp, "2024-03-09 10:00:00");
        assert_eq!(record.level, "ERROR");
        assert_eq!(record.source, "app");
        assert_eq!(record.message, "boom");
        assert!(record.fields.is_empty());
    }

    #[test]
    fn missing_level_defaults_and_missing_message_keeps_payload() {
        let parser = JsonParser::standard();
        let record = parser.parse(&data(r#"{"source":"app"}"#));
        assert_eq!(record.level, "INFO");
        assert_eq!(record.message, r#"{"source":"app"}"#);
    }

    #[test]
    fn malformed_json_degrades_to_error_record() {
        let parser = JsonParser::standard();
        let record = parser.parse(&data("{not json"));
        assert_eq!(record.level, "ERROR");
        assert!(record.message.contains("JSON parse error"));
        assert!(record.message.contains("{not json"));
    }

    #[test]
    fn can_parse_rejects_plain_text() {
        let parser = JsonParser::standard();
        assert!(parser.can_parse(&data(r#"{"a":1}"#)));
        assert!(!parser.can_parse(&data("[2024] plain line")));
    }

    #[test]
    fn compressed_payloads_are_decompressed_first() {
        let (compressed, flag) = crate::compress::compress(br#"{"message":"zipped"}"#);
        assert!(flag);
        let mut data = LogData::new("rec-z", compressed, "src");
        data.compressed = true;

        let parser = JsonParser::standard();
        assert!(parser.can_parse(&data));
        assert_eq!(parser.parse(&data).message, "zipped");
    }
}
