//! Embedded SQLite backend with WAL mode and connection pooling
//!
//! rusqlite is synchronous, so every statement runs on tokio's blocking pool
//! with a pooled connection borrowed for its duration. A transaction keeps its
//! connection until it commits, rolls back or is dropped.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tally_core::{Backend, PoolSize};

use crate::database::{Database, ExecResult, Row, Transaction};
use crate::dialect::{self, ColumnCase};
use crate::error::DbError;
use crate::schema;

pub mod pool;
mod value;

pub use pool::{PooledConnection, SqlitePool};

/// SQLite implementation of [`Database`]
#[derive(Clone)]
pub struct SqliteDatabase {
    pool: Arc<SqlitePool>,
    columns: Arc<ColumnCase>,
}

impl SqliteDatabase {
    /// Open (creating if needed) the database file at `path`.
    pub fn open(path: impl AsRef<Path>, pool_size: PoolSize) -> Result<Self, DbError> {
        Ok(Self {
            pool: Arc::new(SqlitePool::new(path, pool_size)?),
            columns: Arc::new(schema::column_case()),
        })
    }
}

fn check_arity(sql: &str, params: &[Value]) -> Result<(), DbError> {
    let expected = dialect::count_placeholders(sql);
    if expected != params.len() {
        return Err(DbError::ParameterCount {
            expected,
            supplied: params.len(),
        });
    }
    Ok(())
}

fn run_query(
    conn: &rusqlite::Connection,
    case: &ColumnCase,
    sql: &str,
    params: &[Value],
) -> Result<Vec<Row>, DbError> {
    check_arity(sql, params)?;
    let mut stmt = conn.prepare(sql)?;
    value::collect_rows(&mut stmt, params, case)
}

fn run_execute(
    conn: &rusqlite::Connection,
    case: &ColumnCase,
    sql: &str,
    params: &[Value],
) -> Result<ExecResult, DbError> {
    if dialect::has_returning_clause(sql) {
        let rows = run_query(conn, case, sql, params)?;
        return Ok(ExecResult {
            rows_affected: rows.len() as u64,
            inserted_id: rows.first().and_then(|row| crate::database::row_i64(row, "id")),
        });
    }

    check_arity(sql, params)?;
    let mut stmt = conn.prepare(sql)?;
    let changed = stmt.execute(rusqlite::params_from_iter(params.iter().map(value::to_sql)))?;
    Ok(ExecResult {
        rows_affected: changed as u64,
        // last_insert_rowid is stale when the insert was ignored
        inserted_id: (changed > 0 && dialect::is_insert(sql)).then(|| conn.last_insert_rowid()),
    })
}

/// Run blocking rusqlite work off the async worker threads.
async fn blocking<T, F>(work: F) -> Result<T, DbError>
where
    F: FnOnce() -> Result<T, DbError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| DbError::connection(Backend::Sqlite, format!("Task join error: {e}")))?
}

fn finished() -> DbError {
    DbError::connection(Backend::Sqlite, "transaction already finished")
}

#[async_trait]
impl Database for SqliteDatabase {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let pool = Arc::clone(&self.pool);
        let columns = Arc::clone(&self.columns);
        let (sql, params) = (sql.to_string(), params.to_vec());
        blocking(move || {
            let conn = pool.acquire()?;
            run_query(&conn, &columns, &sql, &params)
        })
        .await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult, DbError> {
        let pool = Arc::clone(&self.pool);
        let columns = Arc::clone(&self.columns);
        let (sql, params) = (sql.to_string(), params.to_vec());
        blocking(move || {
            let conn = pool.acquire()?;
            run_execute(&conn, &columns, &sql, &params)
        })
        .await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError> {
        let pool = Arc::clone(&self.pool);
        let conn = blocking(move || {
            let conn = pool.acquire()?;
            // IMMEDIATE takes the write lock up front so a restore cannot
            // deadlock against another writer halfway through.
            conn.execute_batch("BEGIN IMMEDIATE")?;
            Ok(conn)
        })
        .await?;
        Ok(Box::new(SqliteTransaction {
            conn: Some(conn),
            columns: Arc::clone(&self.columns),
        }))
    }
}

/// An open SQLite transaction
pub struct SqliteTransaction {
    conn: Option<PooledConnection>,
    columns: Arc<ColumnCase>,
}

impl SqliteTransaction {
    /// Lend the connection to a blocking task and take it back afterwards.
    ///
    /// If the task never hands it back the connection is closed while still
    /// inside the transaction, which rolls it back.
    async fn with_connection<T, F>(&mut self, work: F) -> Result<T, DbError>
    where
        F: FnOnce(&PooledConnection, &ColumnCase) -> Result<T, DbError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.take().ok_or_else(finished)?;
        let columns = Arc::clone(&self.columns);
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = work(&conn, &columns);
            (conn, result)
        })
        .await
        .map_err(|e| DbError::connection(Backend::Sqlite, format!("Task join error: {e}")))?;
        self.conn = Some(conn);
        result
    }

    async fn finish(mut self: Box<Self>, statement: &'static str) -> Result<(), DbError> {
        let conn = self.conn.take().ok_or_else(finished)?;
        blocking(move || {
            if let Err(e) = conn.execute_batch(statement) {
                // A failed COMMIT (deferred constraint, busy) keeps the transaction open
                if !conn.is_autocommit() {
                    if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                        tracing::warn!(error = %rollback, "Failed to roll back after {statement} failed");
                    }
                }
                return Err(e.into());
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let (sql, params) = (sql.to_string(), params.to_vec());
        self.with_connection(move |conn, columns| run_query(conn, columns, &sql, &params))
            .await
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecResult, DbError> {
        let (sql, params) = (sql.to_string(), params.to_vec());
        self.with_connection(move |conn, columns| run_execute(conn, columns, &sql, &params))
            .await
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "Failed to roll back abandoned transaction");
            } else {
                tracing::debug!("Abandoned transaction rolled back");
            }
        }
    }
}
