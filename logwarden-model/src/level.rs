use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity of a collected log line.
///
/// Ordering matters: the collector's level filter compares ordinals, so the
/// derive order must stay `Trace < Debug < Info < Warning < Error < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    /// The uppercase wire/storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = std::convert::Infallible;

    /// Unknown strings fall back to `Info` so a malformed producer frame
    /// never fails the pipeline on the level alone.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Level::Trace,
            "DEBUG" => Level::Debug,
            "WARNING" | "WARN" => Level::Warning,
            "ERROR" => Level::Error,
            "CRITICAL" | "FATAL" => Level::Critical,
            _ => Level::Info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_severity() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warning);
        assert!(Level::Warning < Level::Error);
        assert!(Level::Error < Level::Critical);
    }

    #[test]
    fn wire_strings_are_uppercase() {
        assert_eq!(Level::Warning.to_string(), "WARNING");
        assert_eq!("error".parse::<Level>().unwrap(), Level::Error);
        assert_eq!("FATAL".parse::<Level>().unwrap(), Level::Critical);
    }

    #[test]
    fn unknown_levels_default_to_info() {
        assert_eq!("verbose".parse::<Level>().unwrap(), Level::Info);
        assert_eq!("".parse::<Level>().unwrap(), Level::Info);
    }
}
