use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity attached to a raised alert. Narrower than [`crate::Level`]:
/// alerts below INFO make no sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Error => "ERROR",
            AlertLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertLevel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "WARNING" | "WARN" => AlertLevel::Warning,
            "ERROR" => AlertLevel::Error,
            "CRITICAL" => AlertLevel::Critical,
            _ => AlertLevel::Info,
        })
    }
}

/// Lifecycle state of an alert.
///
/// Legal transitions: `Pending → Active → (Resolved | Ignored)`. The two
/// terminal states never appear in the active store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    Pending,
    Active,
    Resolved,
    Ignored,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "PENDING",
            AlertStatus::Active => "ACTIVE",
            AlertStatus::Resolved => "RESOLVED",
            AlertStatus::Ignored => "IGNORED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::Ignored)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => AlertStatus::Active,
            "RESOLVED" => AlertStatus::Resolved,
            "IGNORED" => AlertStatus::Ignored,
            _ => AlertStatus::Pending,
        })
    }
}

/// A raised alert, as stored in the active store, the cache, and the webhook
/// body. Serializes to the canonical camelCase JSON shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub name: String,
    pub description: String,
    pub level: AlertLevel,
    pub status: AlertStatus,
    pub source: String,
    #[serde(with = "crate::time::canonical")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "crate::time::canonical")]
    pub update_time: DateTime<Utc>,
    pub count: u32,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub related_log_ids: Vec<String>,
}

impl Alert {
    /// Fresh alert in PENDING state; the manager assigns the final id and
    /// flips it to ACTIVE when it is actually triggered.
    pub fn new(name: impl Into<String>, description: impl Into<String>, level: AlertLevel) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.into(),
            description: description.into(),
            level,
            status: AlertStatus::Pending,
            source: String::new(),
            timestamp: now,
            update_time: now,
            count: 1,
            labels: HashMap::new(),
            annotations: HashMap::new(),
            related_log_ids: Vec::new(),
        }
    }

    /// Two alerts collapse into one when name and the full labels map agree.
    pub fn same_identity(&self, other: &Alert) -> bool {
        self.name == other.name && self.labels == other.labels
    }
}
