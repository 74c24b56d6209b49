use logwarden_model::{Alert, AlertLevel, AnalysisResult, LogRecord};
use tracing::warn;

/// One alerting condition over a record and its analysis results.
///
/// `check` decides; `generate` builds the candidate alert the manager then
/// dedupes or triggers.
pub trait AlertRule: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn check(&self, record: &LogRecord, results: &AnalysisResult) -> bool;
    fn generate(&self, record: &LogRecord, results: &AnalysisResult) -> Alert;
}

/// Numeric threshold over a result field.
#[derive(Debug, Clone)]
pub struct ThresholdAlertRule {
    name: String,
    description: String,
    field: String,
    threshold: f64,
    compare_type: String,
    level: AlertLevel,
}

impl ThresholdAlertRule {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        field: impl Into<String>,
        threshold: f64,
        compare_type: impl Into<String>,
        level: AlertLevel,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            field: field.into(),
            threshold,
            compare_type: compare_type.into(),
            level,
        }
    }

    /// Field lookup with the `record.*` fallback for the three core record
    /// attributes mirrored into result maps.
    fn field_value<'a>(&self, results: &'a AnalysisResult) -> Option<&'a String> {
        results.get(&self.field).or_else(|| {
            match self.field.as_str() {
                "level" => results.get("record.level"),
                "message" => results.get("record.message"),
                "source" => results.get("record.source"),
                _ => None,
            }
        })
    }
}

impl AlertRule for ThresholdAlertRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn check(&self, _record: &LogRecord, results: &AnalysisResult) -> bool {
        let Some(raw) = self.field_value(results) else {
            return false;
        };
        let Ok(value) = raw.parse::<f64>() else {
            return false;
        };

        match self.compare_type.as_str() {
            ">" => value > self.threshold,
            "<" => value < self.threshold,
            ">=" => value >= self.threshold,
            "<=" => value <= self.threshold,
            "==" => value == self.threshold,
            "!=" => value != self.threshold,
            other => {
                warn!("Threshold rule {} has unknown compare type {other:?}", self.name);
                false
            }
        }
    }

    fn generate(&self, record: &LogRecord, results: &AnalysisResult) -> Alert {
        let mut alert = Alert::new(&self.name, &self.description, self.level);
        alert.source = record.source.clone();

        alert.labels.insert("rule".into(), self.name.clone());
        alert.labels.insert("field".into(), self.field.clone());
        alert
            .labels
            .insert("threshold".into(), self.threshold.to_string());
        alert
            .labels
            .insert("compare_type".into(), self.compare_type.clone());

        let summary = match results.get(&self.field) {
            Some(value) => format!(
                "field {} value {} {} {}",
                self.field, value, self.compare_type, self.threshold
            ),
            None => format!("threshold crossed: {} {}", self.compare_type, self.threshold),
        };
        alert.annotations.insert("summary".into(), summary);
        alert
            .annotations
            .insert("description".into(), self.description.clone());

        alert.related_log_ids.push(record.id.clone());
        alert
    }
}

/// Case-insensitive keyword match over a record or result field.
#[derive(Debug, Clone)]
pub struct KeywordAlertRule {
    name: String,
    description: String,
    field: String,
    keywords: Vec<String>,
    match_all: bool,
    level: AlertLevel,
}

impl KeywordAlertRule {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        field: impl Into<String>,
        keywords: Vec<String>,
        match_all: bool,
        level: AlertLevel,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            field: field.into(),
            keywords,
            match_all,
            level,
        }
    }
}

impl AlertRule for KeywordAlertRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn check(&self, record: &LogRecord, results: &AnalysisResult) -> bool {
        let content = match self.field.as_str() {
            "message" => &record.message,
            "level" => &record.level,
            "source" => &record.source,
            field => match results.get(field) {
                Some(value) => value,
                None => return false,
            },
        };

        let content = content.to_lowercase();
        let matched = self
            .keywords
            .iter()
            .filter(|kw| content.contains(&kw.to_lowercase()))
            .count();

        if self.match_all {
            matched == self.keywords.len() && !self.keywords.is_empty()
        } else {
            matched > 0
        }
    }

    fn generate(&self, record: &LogRecord, _results: &AnalysisResult) -> Alert {
        let mut alert = Alert::new(&self.name, &self.description, self.level);
        alert.source = record.source.clone();

        alert.labels.insert("rule".into(), self.name.clone());
        alert.labels.insert("field".into(), self.field.clone());
        alert
            .labels
            .insert("match_all".into(), self.match_all.to_string());

        let keywords = self.keywords.join(", ");
        alert
            .annotations
            .insert("summary".into(), format!("keywords found: {keywords}"));
        alert.annotations.insert("keywords".into(), keywords);
        alert
            .annotations
            .insert("description".into(), self.description.clone());

        alert.related_log_ids.push(record.id.clone());
        alert
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(message: &str) -> LogRecord {
        LogRecord {
            id: "rec-1".into(),
            message: message.into(),
            source: "app".into(),
            level: "INFO".into(),
            ..LogRecord::default()
        }
    }

    #[test]
    fn threshold_compare_operators() {
        let results = AnalysisResult::from([("cpu_usage".to_string(), "85.0".to_string())]);
        let rec = record("x");

        let check = |op: &str, threshold: f64| {
            ThresholdAlertRule::new("t", "", "cpu_usage", threshold, op, AlertLevel::Warning)
                .check(&rec, &results)
        };

        assert!(check(">=", 80.0));
        assert!(check(">", 80.0));
        assert!(!check("<", 80.0));
        assert!(check("<=", 85.0));
        assert!(check("==", 85.0));
        assert!(check("!=", 80.0));
        assert!(!check("~=", 80.0));
    }

    #[test]
    fn threshold_missing_or_non_numeric_field_never_fires() {
        let rule = ThresholdAlertRule::new("t", "", "cpu_usage", 1.0, ">", AlertLevel::Warning);
        let rec = record("x");
        assert!(!rule.check(&rec, &AnalysisResult::new()));

        let results = AnalysisResult::from([("cpu_usage".to_string(), "not a number".to_string())]);
        assert!(!rule.check(&rec, &results));
    }

    #[test]
    fn threshold_falls_back_to_record_star_keys() {
        let rule = ThresholdAlertRule::new("t", "", "level", 3.0, "==", AlertLevel::Info);
        let results = AnalysisResult::from([("record.level".to_string(), "3".to_string())]);
        assert!(rule.check(&record("x"), &results));
    }

    #[test]
    fn keyword_rule_is_case_insensitive() {
        let rule = KeywordAlertRule::new(
            "ErrKw",
            "error keywords",
            "message",
            vec!["failure".into(), "error".into()],
            false,
            AlertLevel::Error,
        );
        assert!(rule.check(&record("Database connection FAILURE"), &AnalysisResult::new()));
        assert!(!rule.check(&record("all systems nominal"), &AnalysisResult::new()));
    }

    #[test]
    fn keyword_match_all_requires_every_keyword() {
        let rule = KeywordAlertRule::new(
            "Both",
            "",
            "message",
            vec!["disk".into(), "full".into()],
            true,
            AlertLevel::Warning,
        );
        assert!(rule.check(&record("disk is full"), &AnalysisResult::new()));
        assert!(!rule.check(&record("disk is fine"), &AnalysisResult::new()));
    }

    #[test]
    fn keyword_alert_annotations_list_configured_keywords() {
        let rule = KeywordAlertRule::new(
            "ErrKw",
            "error keywords",
            "message",
            vec!["failure".into(), "error".into()],
            false,
            AlertLevel::Error,
        );
        let rec = record("Database connection failure");
        let alert = rule.generate(&rec, &AnalysisResult::new());
        assert_eq!(alert.level, AlertLevel::Error);
        assert_eq!(alert.annotations["keywords"], "failure, error");
        assert_eq!(alert.related_log_ids, vec!["rec-1".to_string()]);
        assert_eq!(alert.labels["match_all"], "false");
    }
}
