//! Storage layer for research workflow persistence.
//!
//! [`SqliteStorage`] implements every store trait ([`GraphStore`](crate::graph::GraphStore),
//! [`EvidenceStore`](crate::evidence::EvidenceStore), and so on); each trait impl lives
//! in its own submodule next to the row types it maps.

mod contradictions;
mod evidence;
mod graph;
mod jobs;
mod metrics;
mod sqlite;

pub use sqlite::SqliteStorage;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{StorageError, StorageResult};

/// Format a timestamp for storage. Fixed precision keeps lexical order chronological.
pub(crate) fn to_db_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp, falling back to now for malformed rows.
pub(crate) fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_optional_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value.as_deref().map(parse_timestamp)
}

/// Serialize a JSON column. `None` maps to SQL NULL.
pub(crate) fn to_json_text<T: serde::Serialize>(value: Option<&T>) -> StorageResult<Option<String>> {
    value
        .map(|v| {
            serde_json::to_string(v).map_err(|e| StorageError::Query {
                message: format!("Failed to serialize JSON column: {}", e),
            })
        })
        .transpose()
}

/// Deserialize a JSON column, treating unreadable content as absent.
pub(crate) fn from_json_text<T: serde::de::DeserializeOwned>(value: Option<String>) -> Option<T> {
    value.and_then(|s| serde_json::from_str(&s).ok())
}

/// Parse a stored enum column.
pub(crate) fn parse_enum<T>(column: &str, value: &str) -> StorageResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse().map_err(|e: String| StorageError::Query {
        message: format!("Invalid value in column {}: {}", column, e),
    })
}
