use logwarden_model::{LogData, LogRecord};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::compress;
use crate::parse::{LogParser, assign_field, attach_metadata};

static BRACKET: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]").unwrap());
static LEVEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(TRACE|DEBUG|INFO|WARN|WARNING|ERROR|FATAL|CRITICAL)\]").unwrap());
static CLIENT_IP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})").unwrap());

/// Catch-all parser for bracketed plain-text lines (`[time] [level] message`).
///
/// Beyond the bracket fields it runs a small enrichment pass: the first
/// IPv4-looking token lands in `text.client_ip` and each flag keyword found
/// in the line contributes a `text.contains.<kw>` field.
#[derive(Debug, Clone)]
pub struct TextParser {
    name: String,
    flag_keywords: Vec<String>,
}

impl Default for TextParser {
    fn default() -> Self {
        Self::new(
            ["error", "exception", "failed", "success", "completed", "timeout"]
                .into_iter()
                .map(String::from)
                .collect(),
        )
    }
}

impl TextParser {
    pub fn new(flag_keywords: Vec<String>) -> Self {
        Self {
            name: "TextParser".to_string(),
            flag_keywords,
        }
    }
}

impl LogParser for TextParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_parse(&self, data: &LogData) -> bool {
        if data.compressed {
            return false;
        }
        if data.metadata.get("is_json").map(String::as_str) == Some("true") {
            return false;
        }
        std::str::from_utf8(&data.payload).is_ok()
    }

    fn parse(&self, data: &LogData) -> LogRecord {
        let mut record = LogRecord::from_data(data);
        record.level = "INFO".to_string();

        let content = match compress::payload_text(&data.payload, data.compressed) {
            Ok(text) => text,
            Err(e) => {
                record.level = "ERROR".to_string();
                record.message = format!("{e}");
                attach_metadata(&mut record, data);
                return record;
            }
        };
        record.message = content.clone();

        if let Some(m) = BRACKET.captures(&content).and_then(|c| c.get(1)) {
            assign_field(&mut record, "timestamp", m.as_str().to_string());
        }
        if let Some(m) = LEVEL.captures(&content).and_then(|c| c.get(1)) {
            record.level = m.as_str().to_string();
        }

        // The message proper starts after the last bracket, when there is one.
        if let Some(idx) = content.rfind(']') {
            let tail = content[idx + 1..].trim_start();
            if !tail.is_empty() {
                record.message = tail.to_string();
            }
        }

        let lowered = content.to_lowercase();
        for keyword in &self.flag_keywords {
            if lowered.contains(&keyword.to_lowercase()) {
                record
                    .fields
                    .insert(format!("text.contains.{keyword}"), "true".to_string());
            }
        }

        if let Some(m) = CLIENT_IP.captures(&content).and_then(|c| c.get(1)) {
            record
                .fields
                .insert("text.client_ip".to_string(), m.as_str().to_string());
        }

        attach_metadata(&mut record, data);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(payload: &str) -> LogData {
        LogData::new("rec-1", payload.as_bytes().to_vec(), "src")
    }

    #[test]
    fn extracts_brackets_and_message_tail() {
        let parser = TextParser::default();
        let record = parser.parse(&data("[2024-03-09 10:00:00] [ERROR] connection refused"));
        assert_eq!(record.timestamp, "2024-03-09 10:00:00");
        assert_eq!(record.level, "ERROR");
        assert_eq!(record.message, "connection refused");
    }

    #[test]
    fn flags_keywords_and_client_ip() {
        let parser = TextParser::default();
        let record = parser.parse(&data("request from 192.168.1.20 failed with timeout"));
        assert_eq!(record.fields["text.client_ip"], "192.168.1.20");
        assert_eq!(record.fields["text.contains.failed"], "true");
        assert_eq!(record.fields["text.contains.timeout"], "true");
        assert!(!record.fields.contains_key("text.contains.error"));
    }

    #[test]
    fn json_flagged_frames_are_skipped() {
        let mut data = data(r#"{"a":1}"#);
        data.metadata.insert("is_json".into(), "true".into());
        assert!(!TextParser::default().can_parse(&data));
    }

    #[test]
    fn non_canonical_bracket_time_stays_a_field() {
        let parser = TextParser::default();
        let record = parser.parse(&data("[yesterday] [INFO] all good"));
        assert_eq!(record.fields["timestamp"], "yesterday");
        assert_eq!(record.message, "all good");
        assert_eq!(record.level, "INFO");
    }
}
