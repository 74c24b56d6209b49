use std::collections::HashMap;

use logwarden_model::{LogData, LogRecord};
use regex::Regex;

use crate::compress;
use crate::error::{PipelineError, Result};
use crate::parse::{LogParser, assign_field, attach_metadata};

/// Parser extracting record fields from numbered capture groups.
#[derive(Debug, Clone)]
pub struct RegexParser {
    name: String,
    pattern: Regex,
    field_map: HashMap<usize, String>,
}

impl RegexParser {
    /// The pattern compiles once here; an invalid pattern is a configuration
    /// error, not something to discover per frame.
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        field_map: HashMap<usize, String>,
    ) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| PipelineError::Config(format!("invalid parser pattern: {e}")))?;
        Ok(Self {
            name: name.into(),
            pattern,
            field_map,
        })
    }

    /// Parser for the bracketed `[timestamp] [level] [source]: message`
    /// line format the agent emits by default.
    pub fn bracketed() -> Self {
        let map = HashMap::from([
            (1, "timestamp".to_string()),
            (2, "level".to_string()),
            (3, "source".to_string()),
            (4, "message".to_string()),
        ]);
        Self::new(
            "BracketedParser",
            r"\[(.*?)\]\s+\[(.*?)\]\s+\[(.*?)\]:\s+(.*)",
            map,
        )
        .expect("built-in pattern compiles")
    }
}

impl LogParser for RegexParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_parse(&self, data: &LogData) -> bool {
        // Pre-checking compressed payloads would mean decompressing twice;
        // the fallback path handles them.
        if data.compressed {
            return false;
        }
        match std::str::from_utf8(&data.payload) {
            Ok(text) => self.pattern.is_match(text),
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

        match self.pattern.captures(&content) {
            Some(captures) => {
                for (group, field) in &self.field_map {
                    if let Some(m) = captures.get(*group) {
                        assign_field(&mut record, field, m.as_str().to_string());
                    }
                }
                if record.level.is_empty() {
                    record.level = "INFO".to_string();
                }
                if record.message.is_empty() {
                    // Group 0 is the whole match.
                    record.message = captures[0].to_string();
                }
            }
            None => {
                record.level = "INFO".to_string();
                record.message = content;
            }
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
    fn extracts_mapped_groups() {
        let parser = RegexParser::bracketed();
        let record = parser.parse(&data("[2024-03-09 10:00:00] [ERROR] [auth]: login failed"));
        assert_eq!(record.timestamp, "2024-03-09 10:00:00");
        assert_eq!(record.level, "ERROR");
        assert_eq!(record.source, "auth");
        assert_eq!(record.message, "login failed");
    }

    #[test]
    fn non_matching_content_becomes_info_record() {
        let parser = RegexParser::bracketed();
        let record = parser.parse(&data("free-form line"));
        assert_eq!(record.level, "INFO");
        assert_eq!(record.message, "free-form line");
    }

    #[test]
    fn whole_match_fills_empty_message() {
        let map = HashMap::from([(1, "error_type".to_string())]);
        let parser = RegexParser::new("err", r"error: (\w+)", map).unwrap();
        let record = parser.parse(&data("error: Timeout while connecting"));
        assert_eq!(record.fields["error_type"], "Timeout");
        assert_eq!(record.message, "error: Timeout");
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        assert!(RegexParser::new("bad", r"([unclosed", HashMap::new()).is_err());
    }

    #[test]
    fn compressed_data_is_not_pre_checked() {
        let mut data = data("[a] [b] [c]: d");
        data.compressed = true;
        let parser = RegexParser::bracketed();
        assert!(!parser.can_parse(&data));
    }
}
