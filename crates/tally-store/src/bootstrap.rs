//! Idempotent schema bootstrap
//!
//! Runs once per [`Bootstrapper`] before the application takes traffic:
//!
//! 1. `CREATE TABLE IF NOT EXISTS` for every managed table, parents first
//! 2. additive `ADD COLUMN` migrations, tolerating columns that already exist
//! 3. backfill of `contributions.year` from `periodTag`
//! 4. the baseline admin account, when no user holds the reserved email
//!
//! Every step can be replayed against an already-initialized database.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tally_core::{Role, UserStatus, year_from_period};
use tokio::sync::OnceCell;

use crate::config::AdminSeed;
use crate::credentials::{CredentialError, hash_password};
use crate::database::{Database, row_i64, row_str};
use crate::error::{DbError, StatementErrorKind};
use crate::schema::{ADDITIVE_COLUMNS, ManagedTable};

/// Summary of one bootstrap run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapReport {
    pub tables_ensured: usize,
    /// `table.column` for each column this run actually added
    pub columns_added: Vec<String>,
    pub rows_backfilled: u64,
    pub admin_seeded: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("failed to create table {table}: {source}")]
    CreateTable {
        table: &'static str,
        #[source]
        source: DbError,
    },

    #[error("failed to add column {table}.{column}: {source}")]
    AddColumn {
        table: &'static str,
        column: &'static str,
        #[source]
        source: DbError,
    },

    #[error("failed to backfill contribution years: {0}")]
    Backfill(#[source] DbError),

    #[error("failed to seed admin account: {0}")]
    SeedAdmin(#[source] DbError),

    #[error("failed to hash admin password: {0}")]
    Credential(#[from] CredentialError),
}

/// Brings a database to the current schema exactly once.
pub struct Bootstrapper {
    db: Arc<dyn Database>,
    admin: AdminSeed,
    state: OnceCell<BootstrapReport>,
}

impl Bootstrapper {
    pub fn new(db: Arc<dyn Database>, admin: AdminSeed) -> Self {
        Self {
            db,
            admin,
            state: OnceCell::new(),
        }
    }

    /// Initialize the schema, or return the report of the run that already did.
    ///
    /// Concurrent callers wait for the same run. A failed run leaves the
    /// bootstrapper uninitialized so the next call starts over.
    pub async fn run(&self) -> Result<&BootstrapReport, BootstrapError> {
        self.state.get_or_try_init(|| self.initialize()).await
    }

    pub fn is_ready(&self) -> bool {
        self.state.initialized()
    }

    async fn initialize(&self) -> Result<BootstrapReport, BootstrapError> {
        let backend = self.db.backend();
        tracing::info!(%backend, "Bootstrapping schema");

        let mut report = BootstrapReport::default();
        self.ensure_tables(&mut report).await?;
        self.add_columns(&mut report).await?;
        report.rows_backfilled = self.backfill_years().await.map_err(BootstrapError::Backfill)?;
        report.admin_seeded = self.seed_admin().await?;

        tracing::info!(
            %backend,
            tables = report.tables_ensured,
            columns_added = report.columns_added.len(),
            rows_backfilled = report.rows_backfilled,
            admin_seeded = report.admin_seeded,
            "Schema ready"
        );
        Ok(report)
    }

    async fn ensure_tables(&self, report: &mut BootstrapReport) -> Result<(), BootstrapError> {
        let backend = self.db.backend();
        for table in ManagedTable::ALL {
            match self.db.execute(table.create_sql(backend), &[]).await {
                Ok(_) => {}
                // Two processes racing on PostgreSQL can both pass IF NOT EXISTS
                Err(e) if e.is_already_exists() => {
                    tracing::debug!(table = table.name(), "Table created concurrently");
                }
                Err(source) => {
                    return Err(BootstrapError::CreateTable {
                        table: table.name(),
                        source,
                    });
                }
            }
            report.tables_ensured += 1;
        }
        Ok(())
    }

    async fn add_columns(&self, report: &mut BootstrapReport) -> Result<(), BootstrapError> {
        let backend = self.db.backend();
        for column in ADDITIVE_COLUMNS {
            match self.db.execute(&column.alter_sql(backend), &[]).await {
                Ok(_) => {
                    tracing::info!(
                        table = column.table.name(),
                        column = column.column,
                        "Added column"
                    );
                    report
                        .columns_added
                        .push(format!("{}.{}", column.table.name(), column.column));
                }
                Err(e) if e.is_already_exists() => {
                    tracing::debug!(
                        table = column.table.name(),
                        column = column.column,
                        "Column already present"
                    );
                }
                Err(source) => {
                    return Err(BootstrapError::AddColumn {
                        table: column.table.name(),
                        column: column.column,
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Set `year` wherever it is missing or disagrees with `periodTag`.
    async fn backfill_years(&self) -> Result<u64, DbError> {
        let mut tx = self.db.begin().await?;
        let rows = tx
            .query("SELECT id, periodTag, year FROM contributions", &[])
            .await?;

        let mut updated = 0;
        for row in &rows {
            let Some(id) = row_i64(row, "id") else {
                continue;
            };
            let Some(year) = row_str(row, "periodTag").and_then(year_from_period) else {
                continue;
            };
            if row_i64(row, "year") == Some(year) {
                continue;
            }
            updated += tx
                .execute(
                    "UPDATE contributions SET year = ? WHERE id = ?",
                    &[json!(year), json!(id)],
                )
                .await?
                .rows_affected;
        }
        tx.commit().await?;

        if updated > 0 {
            tracing::info!(rows = updated, "Backfilled contribution years");
        }
        Ok(updated)
    }

    async fn seed_admin(&self) -> Result<bool, BootstrapError> {
        let seed = &self.admin;
        if self
            .db
            .query_one("SELECT id FROM users WHERE email = ?", &[json!(seed.email)])
            .await
            .map_err(BootstrapError::SeedAdmin)?
            .is_some()
        {
            tracing::debug!(email = %seed.email, "Admin account already present");
            return Ok(false);
        }

        let password_hash = hash_password(&seed.password)?;
        let params: [Value; 7] = [
            json!(seed.staff_id),
            json!(seed.email),
            json!(password_hash),
            json!(seed.name),
            json!(Role::Admin.as_str()),
            json!(UserStatus::Approved.as_str()),
            json!(true),
        ];
        let inserted = self
            .db
            .execute(
                "INSERT INTO users (staffId, email, passwordHash, name, role, status, canViewOthers) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                &params,
            )
            .await;

        match inserted {
            Ok(_) => {
                if seed.is_using_default_password() {
                    tracing::warn!(
                        email = %seed.email,
                        "Seeded admin uses the default password; set TALLY_ADMIN_PASSWORD"
                    );
                } else {
                    tracing::info!(email = %seed.email, "Seeded admin account");
                }
                Ok(true)
            }
            // Another process seeded first, or the staff id is taken
            Err(e) if e.kind() == StatementErrorKind::UniqueViolation => {
                tracing::warn!(email = %seed.email, error = %e, "Admin account not seeded");
                Ok(false)
            }
            Err(e) => Err(BootstrapError::SeedAdmin(e)),
        }
    }
}
