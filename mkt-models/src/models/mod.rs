//! Record models and shared column helpers.

pub mod booking;
pub mod message;
pub mod review;
pub mod profile;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use uuid::Uuid;

/// Timestamps are stored as fixed-width RFC 3339 text so they sort lexically.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time at the precision the store keeps.
pub(crate) fn now_ts() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn conversion_error<E>(row: &Row<'_>, col: &str, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    let idx = row.as_ref().column_index(col).unwrap_or(0);
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(crate) fn ts_column(row: &Row<'_>, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(col)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(row, col, e))
}

pub(crate) fn uuid_column(row: &Row<'_>, col: &str) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(col)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(row, col, e))
}

pub(crate) fn opt_uuid_column(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(col)?;
    raw.map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(row, col, e)))
        .transpose()
}
