use logwarden_model::{AnalysisResult, LogRecord};
use regex::Regex;

use crate::analyze::rule::{AnalysisRule, RuleConfig};
use crate::error::{PipelineError, Result};

/// Regex rule: matches the record message and maps capture groups to the
/// configured field names, in order.
#[derive(Debug)]
pub struct RegexRule {
    name: String,
    pattern_text: String,
    pattern: Regex,
    field_names: Vec<String>,
    config: RuleConfig,
}

impl RegexRule {
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        field_names: Vec<String>,
        config: RuleConfig,
    ) -> Result<Self> {
        let compiled = Regex::new(pattern)
            .map_err(|e| PipelineError::Config(format!("invalid rule pattern: {e}")))?;
        Ok(Self {
            name: name.into(),
            pattern_text: pattern.to_string(),
            pattern: compiled,
            field_names,
            config,
        })
    }
}

impl AnalysisRule for RegexRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &RuleConfig {
        &self.config
    }

    fn analyze(&self, record: &LogRecord) -> AnalysisResult {
        let mut results = AnalysisResult::new();
        results.insert("group".to_string(), self.config.group.clone());

        match self.pattern.captures(&record.message) {
            Some(captures) => {
                for (i, field) in self.field_names.iter().enumerate() {
                    if let Some(m) = captures.get(i + 1) {
                        results.insert(field.clone(), m.as_str().to_string());
                    }
                }
                results.insert("matched".to_string(), "true".to_string());
                results.insert("rule".to_string(), self.name.clone());

                // Patterns hunting for failures mark their results so alert
                // rules can key off a single field.
                if ["error", "exception", "failed"]
                    .iter()
                    .any(|kw| self.pattern_text.contains(kw))
                {
                    results.insert("has_error".to_string(), "true".to_string());
                }
            }
            None => {
                results.insert("matched".to_string(), "false".to_string());
            }
        }

        results
    }
}

/// Keyword rule: case-insensitive substring search over the record message.
///
/// With `scoring` enabled the result carries `score`, the percentage of
/// configured keywords that matched.
#[derive(Debug)]
pub struct KeywordRule {
    name: String,
    keywords: Vec<String>,
    scoring: bool,
    config: RuleConfig,
}

impl KeywordRule {
    pub fn new(
        name: impl Into<String>,
        keywords: Vec<String>,
        scoring: bool,
        config: RuleConfig,
    ) -> Self {
        Self {
            name: name.into(),
            keywords,
            scoring,
            config,
        }
    }
}

impl AnalysisRule for KeywordRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &RuleConfig {
        &self.config
    }

    fn analyze(&self, record: &LogRecord) -> AnalysisResult {
        let mut results = AnalysisResult::new();
        results.insert("group".to_string(), self.config.group.clone());

        let message = record.message.to_lowercase();
        let matched: Vec<&String> = self
            .keywords
            .iter()
            .filter(|kw| message.contains(&kw.to_lowercase()))
            .collect();

        if matched.is_empty() {
            results.insert("matched".to_string(), "false".to_string());
            return results;
        }

        results.insert("matched".to_string(), "true".to_string());
        results.insert("rule".to_string(), self.name.clone());
        results.insert("match_count".to_string(), matched.len().to_string());
        if self.scoring && !self.keywords.is_empty() {
            let score = matched.len() * 100 / self.keywords.len();
            results.insert("score".to_string(), score.to_string());
        }
        results.insert(
            "matched_keywords".to_string(),
            matched
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        );

        results
    }
}
