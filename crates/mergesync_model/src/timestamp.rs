//! Millisecond timestamps as stored in `created_at` / `updated_at`.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A point in time with millisecond precision (milliseconds since the Unix epoch, UTC).
///
/// Stores on either side may keep timestamps as integers or as text; `Timestamp`
/// reads both and always writes RFC 3339 text with millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from milliseconds since the Unix epoch.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns milliseconds since the Unix epoch.
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Returns the current wall-clock time.
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Parses a timestamp out of a stored field value.
    ///
    /// Accepts integer milliseconds, RFC 3339 text, and SQLite's
    /// `YYYY-MM-DD HH:MM:SS[.fff]` text (interpreted as UTC).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Self),
            Value::String(s) => Self::parse(s),
            _ => None,
        }
    }

    /// Parses a textual timestamp.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(Self(dt.timestamp_millis()));
        }
        for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                return Some(Self(Utc.from_utc_datetime(&naive).timestamp_millis()));
            }
        }
        text.parse::<i64>().ok().map(Self)
    }

    /// Renders the timestamp as a stored field value.
    pub fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Utc.timestamp_millis_opt(self.0).single() {
            Some(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => write!(f, "{}", self.0),
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}
