//! Database error types.
//!
//! Uses miette for diagnostic output and thiserror for derive macros.
//! Errors split into transient faults a caller may retry (pool pressure,
//! timeouts) and faults that carry enough detail to tell bad input apart
//! from a broken system.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

/// Message shown to end users for any fault that is not their input.
pub const UNAVAILABLE_MESSAGE: &str = "Data temporarily unavailable, will retry";

/// Classification of a failed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    UniqueViolation,
    ForeignKeyViolation,
    NotNullViolation,
    CheckViolation,
    Other,
}

impl QueryErrorKind {
    /// True when the statement was rejected because of the values it carried.
    pub fn is_bad_input(self) -> bool {
        !matches!(self, QueryErrorKind::Other)
    }
}

impl std::fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueryErrorKind::UniqueViolation => "unique violation",
            QueryErrorKind::ForeignKeyViolation => "foreign key violation",
            QueryErrorKind::NotNullViolation => "not null violation",
            QueryErrorKind::CheckViolation => "check violation",
            QueryErrorKind::Other => "query failed",
        };
        f.write_str(s)
    }
}

/// Database operation errors.
#[derive(Error, Diagnostic, Debug)]
pub enum DbError {
    #[error("Database pool is not initialized")]
    #[diagnostic(
        code(dashboard::db::not_initialized),
        help("Call DatabasePool::initialize() at process start before serving requests")
    )]
    NotInitialized,

    #[error("Database pool is closed")]
    #[diagnostic(code(dashboard::db::closed))]
    Closed,

    #[error("Connection error: {message}")]
    #[diagnostic(code(dashboard::db::connection_error))]
    Connection { message: String },

    #[error("Connection pool exhausted: {waiters} callers already waiting on {capacity} connections")]
    #[diagnostic(code(dashboard::db::pool_exhausted))]
    PoolExhausted { capacity: u32, waiters: usize },

    #[error("Timed out after {waited:?} waiting for a database connection")]
    #[diagnostic(code(dashboard::db::timeout))]
    Timeout { waited: Duration },

    #[error("{kind}: {message} (statement: {statement})")]
    #[diagnostic(code(dashboard::db::query_error))]
    Query {
        kind: QueryErrorKind,
        constraint: Option<String>,
        statement: String,
        message: String,
    },

    #[error("Transaction failed at statement {index}: {source}{}", rollback_note(.rollback))]
    #[diagnostic(code(dashboard::db::transaction_error))]
    Transaction {
        /// Zero-based position of the failing statement.
        index: usize,
        #[source]
        source: Box<DbError>,
        /// Set when the rollback issued after the failure also failed.
        rollback: Option<Box<DbError>>,
    },

    #[error("Invalid statement: {message}")]
    #[diagnostic(code(dashboard::db::invalid_statement))]
    InvalidStatement { message: String },
}

fn rollback_note(rollback: &Option<Box<DbError>>) -> String {
    match rollback {
        Some(e) => format!(" (rollback also failed: {})", e),
        None => String::new(),
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    /// Wrap a sqlx error raised while running `statement`.
    pub(crate) fn query(statement: &str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let kind = match db_err.kind() {
                    sqlx::error::ErrorKind::UniqueViolation => QueryErrorKind::UniqueViolation,
                    sqlx::error::ErrorKind::ForeignKeyViolation => {
                        QueryErrorKind::ForeignKeyViolation
                    }
                    sqlx::error::ErrorKind::NotNullViolation => QueryErrorKind::NotNullViolation,
                    sqlx::error::ErrorKind::CheckViolation => QueryErrorKind::CheckViolation,
                    _ => QueryErrorKind::Other,
                };
                DbError::Query {
                    kind,
                    constraint: db_err.constraint().map(str::to_string),
                    statement: statement.to_string(),
                    message: db_err.message().to_string(),
                }
            }
            sqlx::Error::PoolClosed => DbError::Closed,
            sqlx::Error::Io(e) => DbError::Connection {
                message: e.to_string(),
            },
            other => DbError::Query {
                kind: QueryErrorKind::Other,
                constraint: None,
                statement: statement.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Transient faults the caller may surface as retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DbError::PoolExhausted { .. } | DbError::Timeout { .. } | DbError::Connection { .. }
        )
    }

    /// True when the fault was caused by the values the caller supplied.
    pub fn is_bad_input(&self) -> bool {
        match self {
            DbError::Query { kind, .. } => kind.is_bad_input(),
            DbError::Transaction { source, .. } => source.is_bad_input(),
            DbError::InvalidStatement { .. } => true,
            _ => false,
        }
    }

    /// Text safe to show to an end user. Never contains statement text.
    pub fn user_message(&self) -> String {
        match self {
            DbError::Query {
                kind, constraint, ..
            } if kind.is_bad_input() => match constraint {
                Some(name) => format!("Rejected: {} ({})", kind, name),
                None => format!("Rejected: {}", kind),
            },
            DbError::Transaction { source, .. } if source.is_bad_input() => source.user_message(),
            DbError::InvalidStatement { message } => format!("Rejected: {}", message),
            _ => UNAVAILABLE_MESSAGE.to_string(),
        }
    }
}
