//! Rule-based analysis of parsed records.
//!
//! A prioritized, grouped rule store is applied to every submitted record by
//! a pool of worker tasks; each (record, rule) pair produces one result map
//! delivered to the registered callback and, optionally, to storage.

pub mod analyzer;
pub mod metrics;
pub mod rule;
pub mod rules;

pub use analyzer::{AnalysisCallback, LogAnalyzer};
pub use metrics::{MetricsSnapshot, RuleMetricsSnapshot};
pub use rule::{AnalysisRule, RuleConfig};
pub use rules::{KeywordRule, RegexRule};
