//! Export/import behavior against the embedded backend

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tally_core::Backend;
use tally_store::database::row_i64;
use tally_store::snapshot::{self, Envelope};
use tally_store::{
    Database, DbError, ExecResult, ManagedTable, RestorePhase, Row, SnapshotError,
    StatementErrorKind, Transaction,
};
use tempfile::tempdir;

use common::*;

fn sections(envelope: &Envelope) -> Vec<Vec<Row>> {
    ManagedTable::ALL
        .iter()
        .map(|table| envelope.rows(*table).to_vec())
        .collect()
}

#[tokio::test]
async fn test_round_trip_restores_identical_state() {
    let dir = tempdir().unwrap();
    let db = bootstrapped(&dir).await;
    let u1 = add_user(db.as_ref(), "S-100", "u1@corp.test").await;
    add_contribution(db.as_ref(), u1, "Renewal", "2024-03").await;
    add_contribution(db.as_ref(), u1, "Upsell", "2023-11").await;
    add_project(db.as_ref(), u1, "win").await;
    db.execute(
        "INSERT INTO app_meta (key, value) VALUES (?, ?)",
        &[json!("lastReport"), json!("2024-04-01")],
    )
    .await
    .unwrap();

    let before = snapshot::export(db.as_ref()).await.unwrap();
    assert_eq!(before.users.len(), 2);

    // Diverge from the snapshot
    let extra = add_user(db.as_ref(), "S-200", "extra@corp.test").await;
    add_contribution(db.as_ref(), extra, "Noise", "2025-01").await;
    db.execute("DELETE FROM complex_projects", &[]).await.unwrap();
    db.execute("UPDATE app_meta SET value = ?", &[json!("changed")])
        .await
        .unwrap();

    let report = snapshot::import(db.as_ref(), &before).await.unwrap();
    assert_eq!(report.counts["users"], 2);
    assert_eq!(report.counts["contributions"], 2);
    assert_eq!(report.counts["complexProjects"], 1);
    assert_eq!(report.counts["appMeta"], 1);
    assert_eq!(report.counts["publicReports"], 0);

    let after = snapshot::export(db.as_ref()).await.unwrap();
    assert_eq!(sections(&before), sections(&after));
}

#[tokio::test]
async fn test_envelope_survives_serialization() {
    let dir = tempdir().unwrap();
    let db = bootstrapped(&dir).await;
    let u1 = add_user(db.as_ref(), "S-1", "u1@corp.test").await;
    add_contribution(db.as_ref(), u1, "Renewal", "2024-03").await;

    let exported = snapshot::export(db.as_ref()).await.unwrap();
    let bytes = exported.to_json_pretty().unwrap();
    let parsed = Envelope::from_slice(&bytes).unwrap();
    assert_eq!(sections(&exported), sections(&parsed));

    // Embedded JSON text is copied verbatim, not re-encoded
    let contribution = &parsed.contributions[0];
    assert_eq!(contribution["saleApproval"], json!("{\"approvedBy\":\"lead\",\"ok\":true}"));
    let user = parsed
        .users
        .iter()
        .find(|u| u["staffId"] == json!("S-1"))
        .unwrap();
    assert_eq!(user["accountScopes"], json!("[\"north\",\"east\"]"));
}

#[tokio::test]
async fn test_u1_c1_scenario_into_empty_backend() {
    let dir = tempdir().unwrap();
    let source = empty_schema(&dir, "source.db").await;
    let u1 = add_user(source.as_ref(), "S-1", "u1@corp.test").await;
    add_contribution(source.as_ref(), u1, "c1", "2024-06").await;

    let envelope = snapshot::export(source.as_ref()).await.unwrap();
    assert_eq!(envelope.users.len(), 1);
    assert_eq!(envelope.contributions.len(), 1);
    assert_eq!(envelope.contributions[0]["userId"], json!(u1));

    let target = empty_schema(&dir, "target.db").await;
    snapshot::import(target.as_ref(), &envelope).await.unwrap();

    let users = target.query("SELECT * FROM users", &[]).await.unwrap();
    let contributions = target.query("SELECT * FROM contributions", &[]).await.unwrap();
    assert_eq!(users, envelope.users);
    assert_eq!(contributions, envelope.contributions);
}

#[tokio::test]
async fn test_orphan_contribution_rolls_back_everything() {
    let dir = tempdir().unwrap();
    let db = bootstrapped(&dir).await;

    let err = snapshot::import_value(
        db.as_ref(),
        json!({
            "version": 1,
            "users": [],
            "contributions": [{"id": 1, "userId": 999, "periodTag": "2024-01"}],
            "complexProjects": []
        }),
    )
    .await
    .unwrap_err();

    match &err {
        SnapshotError::Restore {
            phase,
            table,
            row,
            source,
        } => {
            assert_eq!(*phase, RestorePhase::Reload);
            assert_eq!(*table, Some("contributions"));
            assert_eq!(*row, Some(0));
            assert_eq!(source.kind(), StatementErrorKind::ForeignKeyViolation);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.is_client_error());

    assert_eq!(count(db.as_ref(), "contributions").await, 0);
    // The wipe was rolled back too
    assert_eq!(count(db.as_ref(), "users").await, 1);
}

#[tokio::test]
async fn test_failure_in_last_table_leaves_earlier_tables_untouched() {
    let dir = tempdir().unwrap();
    let db = bootstrapped(&dir).await;
    let u1 = add_user(db.as_ref(), "S-1", "u1@corp.test").await;
    add_contribution(db.as_ref(), u1, "Keep me", "2024-02").await;
    let before = snapshot::export(db.as_ref()).await.unwrap();

    // Valid users and contributions, then a duplicate key in the last section
    let mut doomed = before.clone();
    doomed.users.truncate(1);
    doomed.contributions.clear();
    let report = json!({"key": "weekly", "html": "<p/>"}).as_object().unwrap().clone();
    doomed.public_reports = vec![report.clone(), report];

    let err = snapshot::import(db.as_ref(), &doomed).await.unwrap_err();
    assert_eq!(err.phase(), Some(RestorePhase::Reload));
    assert_eq!(err.table(), Some("public_reports"));

    let after = snapshot::export(db.as_ref()).await.unwrap();
    assert_eq!(sections(&before), sections(&after));
}

#[tokio::test]
async fn test_older_envelope_without_year_keeps_default() {
    let dir = tempdir().unwrap();
    let db = bootstrapped(&dir).await;
    let admin_id = row_i64(
        &db.query_one("SELECT id FROM users", &[]).await.unwrap().unwrap(),
        "id",
    )
    .unwrap();

    let report = snapshot::import_value(
        db.as_ref(),
        json!({
            "version": 1,
            "exportedAt": "2023-12-31T23:00:00Z",
            "users": [{"id": admin_id, "staffId": "ADMIN", "email": "admin@tally.local",
                       "passwordHash": "x", "legacyFlag": true}],
            "contributions": [{"id": 5, "userId": admin_id, "title": "Old", "periodTag": "2022-09"}],
            "complexProjects": []
        }),
    )
    .await
    .unwrap();
    assert_eq!(report.counts["contributions"], 1);

    let row = db
        .query_one("SELECT * FROM contributions WHERE id = ?", &[json!(5)])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row["year"], Value::Null);
    assert_eq!(row["attachments"], json!("[]"));
    assert_eq!(row["status"], json!("draft"));
}

#[tokio::test]
async fn test_export_tolerates_missing_best_effort_tables() {
    let dir = tempdir().unwrap();
    let db = open_sqlite(&dir, "legacy.db");
    for table in [
        ManagedTable::Users,
        ManagedTable::Contributions,
        ManagedTable::ComplexProjects,
    ] {
        db.execute(table.create_sql(db.backend()), &[]).await.unwrap();
    }
    add_user(db.as_ref(), "S-1", "u1@corp.test").await;

    let envelope = snapshot::export(db.as_ref()).await.unwrap();
    assert_eq!(envelope.users.len(), 1);
    assert!(envelope.app_meta.is_empty());
    assert!(envelope.public_reports.is_empty());

    // Importing creates the best-effort tables on the way
    snapshot::import(db.as_ref(), &envelope).await.unwrap();
    assert_eq!(count(db.as_ref(), "app_meta").await, 0);
}

#[tokio::test]
async fn test_export_fails_when_required_table_missing() {
    let dir = tempdir().unwrap();
    let db = open_sqlite(&dir, "broken.db");
    db.execute(ManagedTable::Users.create_sql(Backend::Sqlite), &[])
        .await
        .unwrap();

    let err = snapshot::export(db.as_ref()).await.unwrap_err();
    assert!(matches!(err, SnapshotError::Export { table: "contributions", .. }));
}

#[tokio::test]
async fn test_export_orders_newest_first() {
    let dir = tempdir().unwrap();
    let db = empty_schema(&dir, "order.db").await;
    let u1 = add_user(db.as_ref(), "S-1", "u1@corp.test").await;
    for (title, created) in [("old", "2023-01-01 00:00:00"), ("new", "2024-01-01 00:00:00"), ("tie", "2024-01-01 00:00:00")] {
        db.execute(
            "INSERT INTO contributions (userId, title, periodTag, createdAt) VALUES (?, ?, ?, ?)",
            &[json!(u1), json!(title), json!("2024-01"), json!(created)],
        )
        .await
        .unwrap();
    }

    let envelope = snapshot::export(db.as_ref()).await.unwrap();
    let titles: Vec<&Value> = envelope.contributions.iter().map(|r| &r["title"]).collect();
    assert_eq!(titles, vec![&json!("tie"), &json!("new"), &json!("old")]);
}

/// Counts transactions opened on the wrapped database.
struct CountingDatabase {
    inner: Arc<dyn Database>,
    begins: AtomicUsize,
}

#[async_trait]
impl Database for CountingDatabase {
    fn backend(&self) -> Backend {
        self.inner.backend()
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        self.inner.query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult, DbError> {
        self.inner.execute(sql, params).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        self.inner.begin().await
    }
}

#[tokio::test]
async fn test_malformed_envelope_never_opens_a_transaction() {
    let dir = tempdir().unwrap();
    let db = CountingDatabase {
        inner: bootstrapped(&dir).await,
        begins: AtomicUsize::new(0),
    };

    for bad in [
        json!("not an object"),
        json!({"users": [], "contributions": {}, "complexProjects": []}),
        json!({"users": [], "complexProjects": []}),
        json!({"users": [], "contributions": [], "complexProjects": [], "publicReports": 3}),
    ] {
        let err = snapshot::import_value(&db, bad).await.unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(err.phase(), Some(RestorePhase::Validation));
    }
    assert_eq!(db.begins.load(Ordering::SeqCst), 0);

    snapshot::import_value(
        &db,
        json!({"users": [], "contributions": [], "complexProjects": []}),
    )
    .await
    .unwrap();
    assert_eq!(db.begins.load(Ordering::SeqCst), 1);
    assert_eq!(count(db.inner.as_ref(), "users").await, 0);
}
