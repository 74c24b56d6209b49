use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use logwarden_model::{AnalysisResult, LogRecord};

/// Settings common to every analysis rule.
///
/// `enabled` is atomic so group enable/disable can flip rules that are
/// concurrently being read by workers.
#[derive(Debug)]
pub struct RuleConfig {
    pub priority: i32,
    pub group: String,
    pub max_retries: u32,
    /// Per-evaluation deadline. Zero means "use the analyzer's fallback".
    pub timeout: Duration,
    enabled: AtomicBool,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            priority: 0,
            group: "default".to_string(),
            max_retries: 3,
            timeout: Duration::from_secs(5),
            enabled: AtomicBool::new(true),
        }
    }
}

impl Clone for RuleConfig {
    fn clone(&self) -> Self {
        Self {
            priority: self.priority,
            group: self.group.clone(),
            max_retries: self.max_retries,
            timeout: self.timeout,
            enabled: AtomicBool::new(self.is_enabled()),
        }
    }
}

impl RuleConfig {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

/// One analysis strategy over records.
///
/// `analyze` is synchronous and CPU-bound; the analyzer runs it on a
/// blocking task under the configured deadline. Failures are reported inside
/// the result map (`error` key), never as a panic.
pub trait AnalysisRule: Send + Sync {
    fn name(&self) -> &str;
    fn config(&self) -> &RuleConfig;
    fn analyze(&self, record: &LogRecord) -> AnalysisResult;
}
