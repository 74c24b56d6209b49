//! Canonical timestamp formatting.
//!
//! Every storage and wire boundary uses the fixed-width `YYYY-MM-DD hh:mm:ss`
//! form; machine epoch integers are never persisted.

use chrono::{DateTime, NaiveDateTime, Utc};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format an instant to the canonical fixed-width string.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a canonical timestamp string back into a naive datetime.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok()
}

/// The current time, already in canonical form.
pub fn now_string() -> String {
    format_timestamp(Utc::now())
}

/// Serde adapter serializing `DateTime<Utc>` as the canonical string.
///
/// Used by [`crate::Alert`] so its JSON shape matches what the webhook body
/// and cache value require.
pub mod canonical {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&format_timestamp(*ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(de)?;
        parse_timestamp(&s)
            .map(|naive| naive.and_utc())
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {s}")))
    }
}
