//! Classification of backend-specific database errors into the workspace's
//! `MartTransient` / `MartFatal` taxonomy, keyed off SQLSTATE class for
//! PostgreSQL and `rusqlite`'s own busy/locked distinction for SQLite.

use dm_types::{MartFatal, MartTransient, Retryability};
use error_stack::Report;

/// SQLSTATE classes (the first two digits) that indicate a condition a
/// retry is expected to clear: connection failures, serialization
/// failures, deadlocks, and "system is shutting down" style states.
const TRANSIENT_CLASSES: &[&str] = &["08", "40", "53", "57"];

/// Every fallible mart operation in this crate returns this rather than
/// picking one of `MartTransient`/`MartFatal` up front, since the
/// classification depends on the underlying driver error.
#[derive(Debug)]
pub enum MartError {
    Transient(Report<MartTransient>),
    Fatal(Report<MartFatal>),
}

impl std::fmt::Display for MartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(report) => write!(f, "{report}"),
            Self::Fatal(report) => write!(f, "{report}"),
        }
    }
}

impl Retryability for MartError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[must_use]
pub fn classify_postgres(error: tokio_postgres::Error) -> MartError {
    let transient = error
        .code()
        .is_some_and(|code| TRANSIENT_CLASSES.contains(&&code.code()[..2]));
    if transient {
        MartError::Transient(Report::new(error).change_context(MartTransient))
    } else {
        MartError::Fatal(Report::new(error).change_context(MartFatal))
    }
}

#[must_use]
pub fn classify_sqlite(error: rusqlite::Error) -> MartError {
    let transient = matches!(
        error.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    );
    if transient {
        MartError::Transient(Report::new(error).change_context(MartTransient))
    } else {
        MartError::Fatal(Report::new(error).change_context(MartFatal))
    }
}

pub fn classify_deadpool_postgres(error: deadpool_postgres::PoolError) -> MartError {
    MartError::Transient(Report::new(error).change_context(MartTransient))
}
