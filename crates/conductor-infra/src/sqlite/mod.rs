//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod execution;
pub mod job;
pub mod pool;
pub mod workflow;

use chrono::{DateTime, SecondsFormat, Utc};
use conductor_types::error::RepositoryError;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Shared row helpers
// ---------------------------------------------------------------------------

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Map a sqlx error, separating lock/busy conditions (retryable) from
/// everything else.
pub(crate) fn map_sqlx_error(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::PoolTimedOut => RepositoryError::Busy(e.to_string()),
        sqlx::Error::Database(db_err) => {
            let busy_code = db_err
                .code()
                .is_some_and(|code| matches!(code.as_ref(), "5" | "6" | "261" | "517"));
            let message = db_err.message();
            if busy_code || message.contains("database is locked") || message.contains("database table is locked") {
                RepositoryError::Busy(message.to_string())
            } else {
                RepositoryError::Query(e.to_string())
            }
        }
        _ => RepositoryError::Query(e.to_string()),
    }
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("serialize {what}: {e}")))
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(s: &str, what: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {what} JSON: {e}")))
}
