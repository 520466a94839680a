use chrono::Utc;

use super::{Envelope, SnapshotError};
use crate::database::Database;
use crate::schema::ManagedTable;

/// Read every managed table into a fresh envelope.
///
/// Rows are copied column for column without re-encoding. A best-effort
/// table that does not exist yet exports as an empty section; any other read
/// failure fails the whole export.
pub async fn export(db: &dyn Database) -> Result<Envelope, SnapshotError> {
    let mut envelope = Envelope::new(Utc::now());

    for table in ManagedTable::ALL {
        let sql = format!(
            "SELECT * FROM {} ORDER BY {}",
            table.name(),
            table.export_order()
        );
        let rows = match db.query(&sql, &[]).await {
            Ok(rows) => rows,
            Err(e) if table.is_best_effort() && e.is_missing_table() => {
                tracing::debug!(table = table.name(), "Table absent, exporting empty section");
                Vec::new()
            }
            Err(source) => {
                tracing::error!(table = table.name(), error = %source, "Export failed");
                return Err(SnapshotError::Export {
                    table: table.name(),
                    source,
                });
            }
        };
        *envelope.rows_mut(table) = rows;
    }

    tracing::info!(
        backend = %db.backend(),
        users = envelope.users.len(),
        contributions = envelope.contributions.len(),
        complex_projects = envelope.complex_projects.len(),
        app_meta = envelope.app_meta.len(),
        public_reports = envelope.public_reports.len(),
        "Snapshot exported"
    );
    Ok(envelope)
}
