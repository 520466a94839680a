//! The statement-execution contract shared by both backends
//!
//! Application code depends only on [`Database`] and [`Transaction`]. The
//! SQLite and PostgreSQL implementations share nothing beyond these traits.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tally_core::Backend;

use crate::config::BackendConfig;
use crate::error::DbError;
use crate::postgres::PostgresDatabase;
use crate::sqlite::SqliteDatabase;

/// One result row: canonical column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// Outcome of a mutating statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    /// Rows changed; zero on an `UPDATE`/`DELETE` means nothing matched
    pub rows_affected: u64,
    /// Key of the inserted row, when the backend can report it
    pub inserted_id: Option<i64>,
}

/// A connected backend.
///
/// Statements issued here each run in their own implicit transaction. Use
/// [`Database::begin`] to group statements.
#[async_trait]
pub trait Database: Send + Sync {
    fn backend(&self) -> Backend;

    /// Run a read statement written with `?` placeholders.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError>;

    /// Like [`Database::query`] but yields at most one row.
    async fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, DbError> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// Run a mutating statement.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult, DbError>;

    /// Open a transaction.
    ///
    /// The returned handle has no `begin` of its own, so transactions never
    /// nest. Dropping it without [`Transaction::commit`] rolls it back.
    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), DbError> {
        self.query("SELECT 1 AS ok", &[]).await.map(|_| ())
    }
}

/// An open transaction holding one connection until it is finished.
#[async_trait]
pub trait Transaction: Send {
    fn backend(&self) -> Backend;

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError>;

    async fn query_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>, DbError> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecResult, DbError>;

    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}

/// Connect to the backend described by `config`.
///
/// Called once at process start; the backend choice is never re-evaluated.
pub async fn connect(config: &BackendConfig) -> Result<Arc<dyn Database>, DbError> {
    match config {
        BackendConfig::Sqlite { path, pool_size } => {
            let db = SqliteDatabase::open(path, *pool_size)?;
            tracing::info!(backend = %Backend::Sqlite, path = %path.display(), "database connected");
            Ok(Arc::new(db))
        }
        BackendConfig::Postgres(pg) => {
            let db = PostgresDatabase::connect(pg.clone()).await?;
            tracing::info!(
                backend = %Backend::Postgres,
                host = %pg.host,
                database = %pg.database,
                "database connected"
            );
            Ok(Arc::new(db))
        }
    }
}

/// Read an integer column, accepting the textual forms some drivers return.
pub fn row_i64(row: &Row, column: &str) -> Option<i64> {
    match row.get(column)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Read a text column.
pub fn row_str<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column)?.as_str()
}
