//! PostgreSQL backend
//!
//! Statements are written once with `?` placeholders and rewritten to `$N`
//! here. Parameters are coerced to the types the server inferred for the
//! prepared statement, and result keys are mapped back to the data model's
//! camelCase names since PostgreSQL folds unquoted identifiers to lower case.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tally_core::Backend;
use tokio_postgres::Client;

use crate::database::{self, Database, ExecResult, Row, Transaction};
use crate::dialect::{self, ColumnCase};
use crate::error::DbError;
use crate::schema;

mod config;
mod pool;
mod value;

pub use config::PostgresConfig;
pub use pool::{PooledClient, PostgresPool};

/// PostgreSQL implementation of [`Database`]
#[derive(Clone)]
pub struct PostgresDatabase {
    pool: Arc<PostgresPool>,
    columns: Arc<ColumnCase>,
}

impl PostgresDatabase {
    pub async fn connect(config: PostgresConfig) -> Result<Self, DbError> {
        Ok(Self {
            pool: Arc::new(PostgresPool::new(config).await?),
            columns: Arc::new(schema::column_case()),
        })
    }
}

async fn run_query(
    client: &Client,
    case: &ColumnCase,
    sql: &str,
    params: &[Value],
) -> Result<Vec<Row>, DbError> {
    let expected = dialect::count_placeholders(sql);
    if expected != params.len() {
        return Err(DbError::ParameterCount {
            expected,
            supplied: params.len(),
        });
    }

    let sql = dialect::rewrite_placeholders(sql, Backend::Postgres);
    let stmt = client.prepare(&sql).await?;
    let bound = value::coerce_params(stmt.params(), params)?;
    let rows = client.query(&stmt, &value::as_refs(&bound)).await?;
    rows.iter().map(|row| value::decode_row(row, case)).collect()
}

async fn run_execute(
    client: &Client,
    case: &ColumnCase,
    sql: &str,
    params: &[Value],
) -> Result<ExecResult, DbError> {
    if dialect::has_returning_clause(sql) {
        let rows = run_query(client, case, sql, params).await?;
        return Ok(ExecResult {
            rows_affected: rows.len() as u64,
            inserted_id: rows.first().and_then(|row| database::row_i64(row, "id")),
        });
    }

    let expected = dialect::count_placeholders(sql);
    if expected != params.len() {
        return Err(DbError::ParameterCount {
            expected,
            supplied: params.len(),
        });
    }

    let sql = dialect::rewrite_placeholders(sql, Backend::Postgres);
    let stmt = client.prepare(&sql).await?;
    let bound = value::coerce_params(stmt.params(), params)?;
    let rows_affected = client.execute(&stmt, &value::as_refs(&bound)).await?;
    // No last-insert-id outside RETURNING
    Ok(ExecResult {
        rows_affected,
        inserted_id: None,
    })
}

#[async_trait]
impl Database for PostgresDatabase {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let conn = self.pool.acquire().await?;
        run_query(conn.client()?, &self.columns, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult, DbError> {
        let conn = self.pool.acquire().await?;
        run_execute(conn.client()?, &self.columns, sql, params).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError> {
        let conn = self.pool.acquire().await?;
        conn.client()?.batch_execute("BEGIN").await?;
        Ok(Box::new(PgTransaction {
            conn: Some(conn),
            columns: Arc::clone(&self.columns),
        }))
    }
}

/// An open PostgreSQL transaction on a dedicated pooled connection
pub struct PgTransaction {
    conn: Option<PooledClient>,
    columns: Arc<ColumnCase>,
}

impl PgTransaction {
    fn client(&self) -> Result<&Client, DbError> {
        self.conn
            .as_ref()
            .ok_or_else(|| DbError::connection(Backend::Postgres, "transaction already finished"))?
            .client()
    }

    async fn finish(mut self, statement: &str) -> Result<(), DbError> {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| DbError::connection(Backend::Postgres, "transaction already finished"))?;
        let result = match conn.client() {
            Ok(client) => client.batch_execute(statement).await.map_err(DbError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            tracing::warn!(error = %e, "{statement} failed, discarding connection");
            conn.discard();
        }
        result
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        run_query(self.client()?, &self.columns, sql, params).await
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecResult, DbError> {
        run_execute(self.client()?, &self.columns, sql, params).await
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        // Session state is unknown; closing the connection makes the server
        // roll the transaction back.
        if let Some(conn) = self.conn.take() {
            tracing::debug!("Abandoned transaction, discarding its connection");
            conn.discard();
        }
    }
}
