//! Column conversion helpers shared by the per-entity row mappers.
//!
//! JSON blobs are stored as JSON text, timestamps as RFC-3339 text.
//! Conversion failures are reported through
//! `rusqlite::Error::FromSqlConversionFailure` so they surface with the
//! column index that produced them.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;

pub(crate) fn conversion_err(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Encode an optional JSON blob for storage.
pub(crate) fn json_to_sql(value: Option<&serde_json::Value>) -> Option<String> {
    value.map(|v| v.to_string())
}

/// Decode an optional JSON text column.
pub(crate) fn json_from_sql(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<serde_json::Value>> {
    raw.map(|s| serde_json::from_str(&s).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

/// Encode an optional timestamp for storage.
pub(crate) fn ts_to_sql(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|t| t.to_rfc3339())
}

/// Decode an optional RFC-3339 text column.
pub(crate) fn ts_from_sql(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

/// Decode a mandatory RFC-3339 text column.
pub(crate) fn required_ts_from_sql(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}
