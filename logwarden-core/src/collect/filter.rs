use logwarden_model::{Level, LogEntry};

/// Strategy applied to every submitted entry. An entry is dropped as soon as
/// any configured filter says so.
pub trait LogFilter: Send + Sync {
    fn should_drop(&self, entry: &LogEntry) -> bool;
}

/// Rejects entries below a minimum severity.
#[derive(Debug, Clone, Copy)]
pub struct LevelFilter {
    min: Level,
}

impl LevelFilter {
    pub fn new(min: Level) -> Self {
        Self { min }
    }
}

impl LogFilter for LevelFilter {
    fn should_drop(&self, entry: &LogEntry) -> bool {
        entry.level < self.min
    }
}

/// Substring keyword filter.
///
/// Inclusive mode drops entries containing any keyword (a denylist);
/// exclusive mode drops entries containing none of them (an allowlist).
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    keywords: Vec<String>,
    inclusive: bool,
}

impl KeywordFilter {
    pub fn new(keywords: Vec<String>, inclusive: bool) -> Self {
        Self { keywords, inclusive }
    }
}

impl LogFilter for KeywordFilter {
    fn should_drop(&self, entry: &LogEntry) -> bool {
        if self.keywords.is_empty() {
            return false;
        }
        let content = String::from_utf8_lossy(&entry.content);
        let any_present = self.keywords.iter().any(|kw| content.contains(kw.as_str()));
        if self.inclusive { any_present } else { !any_present }
    }
}
