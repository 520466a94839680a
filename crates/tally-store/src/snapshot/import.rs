use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use serde_json::{Value, json};
use tally_core::Backend;

use super::{Envelope, RestorePhase, RestoreReport, SnapshotError};
use crate::database::{Database, Row, Transaction, row_str};
use crate::error::DbError;
use crate::schema::{self, ManagedTable};

/// SQLite has no cascading truncate: children go before their parent.
const SQLITE_WIPE_ORDER: [ManagedTable; 5] = [
    ManagedTable::Contributions,
    ManagedTable::ComplexProjects,
    ManagedTable::Users,
    ManagedTable::AppMeta,
    ManagedTable::PublicReports,
];

/// Validate an untrusted document, then restore it.
///
/// A malformed document is rejected before any transaction is opened.
pub async fn import_value(db: &dyn Database, value: Value) -> Result<RestoreReport, SnapshotError> {
    let envelope = Envelope::from_value(value)?;
    import(db, &envelope).await
}

/// Replace all managed data with the contents of `envelope`.
///
/// Wipe and reload run in one transaction: either every row is loaded and
/// committed, or nothing changes.
pub async fn import(db: &dyn Database, envelope: &Envelope) -> Result<RestoreReport, SnapshotError> {
    let backend = db.backend();
    tracing::info!(%backend, version = envelope.version, "Restore started");

    let mut tx = db
        .begin()
        .await
        .map_err(|source| SnapshotError::restore(RestorePhase::Wipe, None, None, source))?;

    let counts = match replace_all(tx.as_mut(), envelope).await {
        Ok(counts) => counts,
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::error!(error = %rollback, "Rollback after failed restore also failed");
            }
            tracing::warn!(
                phase = e.phase().map(|p| p.as_str()).unwrap_or("unknown"),
                error = %e,
                "Restore rolled back"
            );
            return Err(e);
        }
    };

    tx.commit()
        .await
        .map_err(|source| SnapshotError::restore(RestorePhase::Commit, None, None, source))?;

    let report = RestoreReport {
        restored_at: Utc::now(),
        counts,
    };
    tracing::info!(%backend, counts = ?report.counts, "Restore committed");
    Ok(report)
}

async fn replace_all(
    tx: &mut dyn Transaction,
    envelope: &Envelope,
) -> Result<BTreeMap<String, usize>, SnapshotError> {
    ensure_best_effort_tables(tx).await?;
    wipe(tx).await?;

    let mut counts = BTreeMap::new();
    for table in ManagedTable::ALL {
        let loaded = reload_table(tx, table, envelope.rows(table)).await?;
        counts.insert(table.envelope_key().to_string(), loaded);
    }

    if tx.backend() == Backend::Postgres {
        realign_sequences(tx).await?;
    }
    Ok(counts)
}

async fn ensure_best_effort_tables(tx: &mut dyn Transaction) -> Result<(), SnapshotError> {
    let backend = tx.backend();
    for table in ManagedTable::ALL.into_iter().filter(|t| t.is_best_effort()) {
        match tx.execute(table.create_sql(backend), &[]).await {
            Ok(_) => {}
            Err(e) if e.is_already_exists() => {}
            Err(source) => {
                return Err(SnapshotError::restore(
                    RestorePhase::Wipe,
                    Some(table.name()),
                    None,
                    source,
                ));
            }
        }
    }
    Ok(())
}

async fn wipe(tx: &mut dyn Transaction) -> Result<(), SnapshotError> {
    match tx.backend() {
        Backend::Postgres => {
            let tables: Vec<&str> = ManagedTable::ALL.iter().map(|t| t.name()).collect();
            let sql = format!("TRUNCATE {} RESTART IDENTITY CASCADE", tables.join(", "));
            tx.execute(&sql, &[])
                .await
                .map_err(|source| SnapshotError::restore(RestorePhase::Wipe, None, None, source))?;
        }
        Backend::Sqlite => {
            for table in SQLITE_WIPE_ORDER {
                tx.execute(&format!("DELETE FROM {}", table.name()), &[])
                    .await
                    .map_err(|source| {
                        SnapshotError::restore(RestorePhase::Wipe, Some(table.name()), None, source)
                    })?;
            }
        }
    }
    tracing::debug!("Managed tables wiped");
    Ok(())
}

/// Live columns of `table`, keyed by lower-cased name.
async fn live_columns(
    tx: &mut dyn Transaction,
    table: ManagedTable,
) -> Result<HashMap<String, String>, DbError> {
    let backend = tx.backend();
    let rows = tx
        .query(schema::columns_query(backend), &[json!(table.name())])
        .await?;
    Ok(rows
        .iter()
        .filter_map(|row| row_str(row, "name"))
        .map(|name| (name.to_ascii_lowercase(), name.to_string()))
        .collect())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Build the insert for one row from the columns it shares with the table.
fn insert_statement(table: ManagedTable, live: &HashMap<String, String>, row: &Row) -> (String, Vec<Value>) {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    let mut params = Vec::new();

    for (key, value) in row {
        let Some(column) = live.get(&key.to_ascii_lowercase()) else {
            continue;
        };
        if seen.insert(column.as_str()) {
            columns.push(quote_ident(column));
            params.push(value.clone());
        }
    }

    let sql = if columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", table.name())
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.name(),
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        )
    };
    (sql, params)
}

async fn reload_table(
    tx: &mut dyn Transaction,
    table: ManagedTable,
    rows: &[Row],
) -> Result<usize, SnapshotError> {
    if rows.is_empty() {
        return Ok(0);
    }

    let live = live_columns(tx, table).await.map_err(|source| {
        SnapshotError::restore(RestorePhase::Reload, Some(table.name()), None, source)
    })?;

    for (index, row) in rows.iter().enumerate() {
        let (sql, params) = insert_statement(table, &live, row);
        tx.execute(&sql, &params).await.map_err(|source| {
            SnapshotError::restore(RestorePhase::Reload, Some(table.name()), Some(index), source)
        })?;
    }

    tracing::debug!(table = table.name(), rows = rows.len(), "Table reloaded");
    Ok(rows.len())
}

/// Move identity sequences past the explicitly inserted keys.
async fn realign_sequences(tx: &mut dyn Transaction) -> Result<(), SnapshotError> {
    for table in ManagedTable::ALL.into_iter().filter(|t| t.has_identity()) {
        let sql = format!(
            "SELECT setval(pg_get_serial_sequence('{name}', 'id'), COALESCE(MAX(id), 0) + 1, false) FROM {name}",
            name = table.name()
        );
        tx.query(&sql, &[]).await.map_err(|source| {
            SnapshotError::restore(RestorePhase::Reload, Some(table.name()), None, source)
        })?;
    }
    Ok(())
}
