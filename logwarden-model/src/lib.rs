//! Shared data models for the Logwarden pipeline.
//!
//! Every subsystem (collector, processor, analyzer, alert manager) speaks in
//! terms of these types. They carry no I/O and no locking; the engine crates
//! wrap them in whatever synchronization they need.

pub mod alert;
pub mod level;
pub mod record;
pub mod time;

pub use alert::{Alert, AlertLevel, AlertStatus};
pub use level::Level;
pub use record::{AnalysisResult, LogData, LogEntry, LogRecord};
pub use time::{format_timestamp, now_string, parse_timestamp};
