//! Adapter errors with backend-neutral classification.
//!
//! Every failure keeps the backend's native message. The classification in
//! [`StatementErrorKind`] is what callers branch on; the bootstrapper treats
//! [`StatementErrorKind::AlreadyExists`] as success and the exporter treats
//! [`StatementErrorKind::MissingTable`] on best-effort tables as empty.

use std::fmt;

use tally_core::Backend;
use tokio_postgres::error::SqlState;

/// Classification of a failed statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementErrorKind {
    /// The object a DDL statement creates is already there
    AlreadyExists,
    /// The statement references a table that does not exist
    MissingTable,
    ForeignKeyViolation,
    UniqueViolation,
    /// NOT NULL or CHECK constraint failed
    ConstraintViolation,
    Other,
}

impl StatementErrorKind {
    pub fn is_constraint_violation(self) -> bool {
        matches!(
            self,
            StatementErrorKind::ForeignKeyViolation
                | StatementErrorKind::UniqueViolation
                | StatementErrorKind::ConstraintViolation
        )
    }
}

impl fmt::Display for StatementErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StatementErrorKind::AlreadyExists => "already exists",
            StatementErrorKind::MissingTable => "missing table",
            StatementErrorKind::ForeignKeyViolation => "foreign key violation",
            StatementErrorKind::UniqueViolation => "unique violation",
            StatementErrorKind::ConstraintViolation => "constraint violation",
            StatementErrorKind::Other => "statement error",
        };
        f.write_str(label)
    }
}

/// Errors surfaced by the dialect adapter
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("connection to {backend} backend failed: {message}")]
    Connection { backend: Backend, message: String },

    #[error("{backend} {kind}: {message}")]
    Statement {
        backend: Backend,
        kind: StatementErrorKind,
        /// Native code (SQLite extended result code or PostgreSQL SQLSTATE)
        code: Option<String>,
        message: String,
    },

    #[error("parameter {index} cannot be bound as {expected}: {message}")]
    Bind {
        index: usize,
        expected: String,
        message: String,
    },

    #[error("column '{column}' cannot be decoded: {message}")]
    Decode { column: String, message: String },

    #[error("statement has {expected} placeholders but {supplied} parameters were supplied")]
    ParameterCount { expected: usize, supplied: usize },

    #[error("{backend} connection pool exhausted ({limit} connections)")]
    PoolExhausted { backend: Backend, limit: usize },

    #[error("invalid {backend} configuration: {message}")]
    Config { backend: Backend, message: String },
}

impl DbError {
    /// Statement classification, `Other` for non-statement failures.
    pub fn kind(&self) -> StatementErrorKind {
        match self {
            DbError::Statement { kind, .. } => *kind,
            _ => StatementErrorKind::Other,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == StatementErrorKind::AlreadyExists
    }

    pub fn is_missing_table(&self) -> bool {
        self.kind() == StatementErrorKind::MissingTable
    }

    pub fn is_constraint_violation(&self) -> bool {
        self.kind().is_constraint_violation()
    }

    pub(crate) fn connection(backend: Backend, message: impl Into<String>) -> Self {
        DbError::Connection {
            backend,
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi;

        let message = err.to_string();
        match &err {
            rusqlite::Error::SqliteFailure(failure, _) => {
                let kind = match failure.extended_code {
                    ffi::SQLITE_CONSTRAINT_FOREIGNKEY => StatementErrorKind::ForeignKeyViolation,
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        StatementErrorKind::UniqueViolation
                    }
                    _ if failure.code == rusqlite::ErrorCode::ConstraintViolation => {
                        StatementErrorKind::ConstraintViolation
                    }
                    _ if failure.code == rusqlite::ErrorCode::CannotOpen => {
                        return DbError::connection(Backend::Sqlite, message);
                    }
                    _ => classify_sqlite_message(&message),
                };
                DbError::Statement {
                    backend: Backend::Sqlite,
                    kind,
                    code: Some(failure.extended_code.to_string()),
                    message,
                }
            }
            // Prepare-time failures arrive as input errors with the same text
            _ => DbError::Statement {
                backend: Backend::Sqlite,
                kind: classify_sqlite_message(&message),
                code: None,
                message,
            },
        }
    }
}

// SQLite reports schema conflicts as plain SQLITE_ERROR, only the text differs.
fn classify_sqlite_message(message: &str) -> StatementErrorKind {
    let lower = message.to_ascii_lowercase();
    if lower.contains("duplicate column name") || lower.contains("already exists") {
        StatementErrorKind::AlreadyExists
    } else if lower.contains("no such table") {
        StatementErrorKind::MissingTable
    } else {
        StatementErrorKind::Other
    }
}

impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        let Some(db_error) = err.as_db_error() else {
            if err.is_closed() {
                return DbError::connection(Backend::Postgres, err.to_string());
            }
            return DbError::Statement {
                backend: Backend::Postgres,
                kind: StatementErrorKind::Other,
                code: None,
                message: err.to_string(),
            };
        };

        let code = db_error.code();
        let kind = if *code == SqlState::DUPLICATE_COLUMN
            || *code == SqlState::DUPLICATE_TABLE
            || *code == SqlState::DUPLICATE_OBJECT
        {
            StatementErrorKind::AlreadyExists
        } else if *code == SqlState::UNDEFINED_TABLE {
            StatementErrorKind::MissingTable
        } else if *code == SqlState::FOREIGN_KEY_VIOLATION {
            StatementErrorKind::ForeignKeyViolation
        } else if *code == SqlState::UNIQUE_VIOLATION {
            StatementErrorKind::UniqueViolation
        } else if *code == SqlState::NOT_NULL_VIOLATION || *code == SqlState::CHECK_VIOLATION {
            StatementErrorKind::ConstraintViolation
        } else {
            StatementErrorKind::Other
        };

        let mut message = db_error.message().to_string();
        if let Some(detail) = db_error.detail() {
            message.push_str(" (");
            message.push_str(detail);
            message.push(')');
        }

        DbError::Statement {
            backend: Backend::Postgres,
            kind,
            code: Some(code.code().to_string()),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_message_classification() {
        assert_eq!(
            classify_sqlite_message("duplicate column name: year"),
            StatementErrorKind::AlreadyExists
        );
        assert_eq!(
            classify_sqlite_message("table users already exists"),
            StatementErrorKind::AlreadyExists
        );
        assert_eq!(
            classify_sqlite_message("no such table: app_meta"),
            StatementErrorKind::MissingTable
        );
        assert_eq!(
            classify_sqlite_message("near \"SELEC\": syntax error"),
            StatementErrorKind::Other
        );
    }

    #[test]
    fn test_sqlite_error_conversion() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (a TEXT UNIQUE)").unwrap();
        let err: DbError = conn
            .execute_batch("CREATE TABLE t (a TEXT)")
            .unwrap_err()
            .into();
        assert!(err.is_already_exists());

        conn.execute("INSERT INTO t (a) VALUES ('x')", []).unwrap();
        let err: DbError = conn
            .execute("INSERT INTO t (a) VALUES ('x')", [])
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), StatementErrorKind::UniqueViolation);
        assert!(err.is_constraint_violation());
        assert!(err.to_string().contains("UNIQUE constraint failed"));
    }

    #[test]
    fn test_pool_exhaustion_is_not_a_statement_error() {
        let err = DbError::PoolExhausted {
            backend: Backend::Postgres,
            limit: 4,
        };
        assert!(!err.is_constraint_violation());
        assert_eq!(err.kind(), StatementErrorKind::Other);
    }
}
