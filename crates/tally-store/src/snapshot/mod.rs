//! Full-system backup and restore
//!
//! [`export`] reads every managed table into one versioned [`Envelope`];
//! [`import`] validates an envelope and replaces all managed data with it
//! inside a single transaction. The envelope is backend-neutral, so a backup
//! taken from SQLite restores into PostgreSQL and the other way round.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::database::Row;
use crate::error::DbError;
use crate::schema::ManagedTable;

mod export;
mod import;

pub use export::export;
pub use import::{import, import_value};

/// Newest envelope format this build reads and the one it writes.
pub const ENVELOPE_VERSION: u32 = 1;

const ARTIFACT_PREFIX: &str = "tally-backup-";
const ARTIFACT_TIMESTAMP: &str = "%Y%m%d-%H%M%S";

/// File name for a backup taken at `at`, e.g. `tally-backup-20240501-120000.json`.
pub fn artifact_name(at: DateTime<Utc>) -> String {
    format!("{ARTIFACT_PREFIX}{}.json", at.format(ARTIFACT_TIMESTAMP))
}

/// Timestamp encoded in a backup file name, `None` for any other file.
pub fn parse_artifact_name(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.strip_prefix(ARTIFACT_PREFIX)?.strip_suffix(".json")?;
    chrono::NaiveDateTime::parse_from_str(stamp, ARTIFACT_TIMESTAMP)
        .ok()
        .map(|naive| naive.and_utc())
}

/// The backup document: one array of rows per managed table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<DateTime<Utc>>,
    pub users: Vec<Row>,
    pub contributions: Vec<Row>,
    pub complex_projects: Vec<Row>,
    pub app_meta: Vec<Row>,
    pub public_reports: Vec<Row>,
}

impl Envelope {
    /// An empty envelope stamped with `exported_at`.
    pub fn new(exported_at: DateTime<Utc>) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            exported_at: Some(exported_at),
            users: Vec::new(),
            contributions: Vec::new(),
            complex_projects: Vec::new(),
            app_meta: Vec::new(),
            public_reports: Vec::new(),
        }
    }

    pub fn rows(&self, table: ManagedTable) -> &[Row] {
        match table {
            ManagedTable::Users => &self.users,
            ManagedTable::Contributions => &self.contributions,
            ManagedTable::ComplexProjects => &self.complex_projects,
            ManagedTable::AppMeta => &self.app_meta,
            ManagedTable::PublicReports => &self.public_reports,
        }
    }

    pub fn rows_mut(&mut self, table: ManagedTable) -> &mut Vec<Row> {
        match table {
            ManagedTable::Users => &mut self.users,
            ManagedTable::Contributions => &mut self.contributions,
            ManagedTable::ComplexProjects => &mut self.complex_projects,
            ManagedTable::AppMeta => &mut self.app_meta,
            ManagedTable::PublicReports => &mut self.public_reports,
        }
    }

    /// Row count per envelope section.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        ManagedTable::ALL
            .iter()
            .map(|table| (table.envelope_key().to_string(), self.rows(*table).len()))
            .collect()
    }

    /// Check the shape of an untrusted document and take it apart.
    ///
    /// This is the only validation a restore performs before touching the
    /// database. `version` may be omitted by hand-written documents and then
    /// counts as the current version; `appMeta` and `publicReports` may be
    /// omitted or null.
    pub fn from_value(value: Value) -> Result<Self, SnapshotError> {
        let Value::Object(mut map) = value else {
            return Err(invalid("envelope must be a JSON object"));
        };

        let version = match map.get("version") {
            None => ENVELOPE_VERSION,
            Some(raw) => {
                let version = raw
                    .as_u64()
                    .ok_or_else(|| invalid(format!("'version' must be a positive integer, got {raw}")))?;
                if version == 0 || version > u64::from(ENVELOPE_VERSION) {
                    return Err(invalid(format!(
                        "unsupported envelope version {version} (newest supported is {ENVELOPE_VERSION})"
                    )));
                }
                version as u32
            }
        };

        let exported_at = match map.get("exportedAt") {
            Some(Value::String(raw)) => match DateTime::parse_from_rfc3339(raw) {
                Ok(ts) => Some(ts.with_timezone(&Utc)),
                Err(e) => {
                    tracing::debug!(exported_at = %raw, error = %e, "Ignoring unparseable exportedAt");
                    None
                }
            },
            _ => None,
        };

        let mut envelope = Self {
            version,
            exported_at,
            users: Vec::new(),
            contributions: Vec::new(),
            complex_projects: Vec::new(),
            app_meta: Vec::new(),
            public_reports: Vec::new(),
        };
        for table in ManagedTable::ALL {
            *envelope.rows_mut(table) = take_rows(&mut map, table)?;
        }
        Ok(envelope)
    }

    /// Parse and validate raw JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| invalid(format!("envelope is not valid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Artifact file name derived from the export time.
    pub fn file_name(&self) -> String {
        artifact_name(self.exported_at.unwrap_or_else(Utc::now))
    }

    pub fn to_json_pretty(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

fn invalid(message: impl Into<String>) -> SnapshotError {
    SnapshotError::InvalidEnvelope(message.into())
}

fn take_rows(map: &mut Map<String, Value>, table: ManagedTable) -> Result<Vec<Row>, SnapshotError> {
    let key = table.envelope_key();
    let items = match map.remove(key) {
        Some(Value::Array(items)) => items,
        None | Some(Value::Null) if table.is_best_effort() => return Ok(Vec::new()),
        None => return Err(invalid(format!("missing '{key}' array"))),
        Some(_) => return Err(invalid(format!("'{key}' must be an array"))),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(row) => Ok(row),
            _ => Err(invalid(format!("'{key}[{index}]' must be an object"))),
        })
        .collect()
}

/// Stage of a restore, reported with every failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RestorePhase {
    Validation,
    Wipe,
    Reload,
    Commit,
}

impl RestorePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RestorePhase::Validation => "validation",
            RestorePhase::Wipe => "wipe",
            RestorePhase::Reload => "reload",
            RestorePhase::Commit => "commit",
        }
    }
}

impl fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("invalid backup envelope: {0}")]
    InvalidEnvelope(String),

    #[error("failed to read table {table}: {source}")]
    Export {
        table: &'static str,
        source: DbError,
    },

    #[error("restore failed in {phase} phase{}: {source}", location(.table, .row))]
    Restore {
        phase: RestorePhase,
        table: Option<&'static str>,
        /// Index of the failing row within its envelope section
        row: Option<usize>,
        source: DbError,
    },

    #[error("failed to encode envelope: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn location(table: &Option<&'static str>, row: &Option<usize>) -> String {
    match (table, row) {
        (Some(table), Some(row)) => format!(" at {table}[{row}]"),
        (Some(table), None) => format!(" on {table}"),
        _ => String::new(),
    }
}

impl SnapshotError {
    /// Restore stage the error belongs to, if it came from a restore.
    pub fn phase(&self) -> Option<RestorePhase> {
        match self {
            SnapshotError::InvalidEnvelope(_) => Some(RestorePhase::Validation),
            SnapshotError::Restore { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    pub fn table(&self) -> Option<&'static str> {
        match self {
            SnapshotError::Export { table, .. } => Some(*table),
            SnapshotError::Restore { table, .. } => *table,
            _ => None,
        }
    }

    /// Whether the caller sent something unusable, as opposed to the
    /// backend failing.
    pub fn is_client_error(&self) -> bool {
        matches!(self, SnapshotError::InvalidEnvelope(_))
    }

    pub(crate) fn restore(
        phase: RestorePhase,
        table: Option<&'static str>,
        row: Option<usize>,
        source: DbError,
    ) -> Self {
        SnapshotError::Restore {
            phase,
            table,
            row,
            source,
        }
    }
}

/// Outcome of a committed restore
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub restored_at: DateTime<Utc>,
    /// Rows loaded per envelope section
    pub counts: BTreeMap<String, usize>,
}
