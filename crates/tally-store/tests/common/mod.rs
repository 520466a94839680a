#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value, json};
use tally_core::PoolSize;
use tally_store::{AdminSeed, Bootstrapper, Database, ManagedTable, SqliteDatabase};
use tempfile::TempDir;

pub fn open_sqlite(dir: &TempDir, file: &str) -> Arc<dyn Database> {
    Arc::new(SqliteDatabase::open(dir.path().join(file), PoolSize::small()).unwrap())
}

/// A bootstrapped database holding only the seeded admin.
pub async fn bootstrapped(dir: &TempDir) -> Arc<dyn Database> {
    let db = open_sqlite(dir, "tally.db");
    Bootstrapper::new(Arc::clone(&db), AdminSeed::default())
        .run()
        .await
        .unwrap();
    db
}

/// Managed tables without any seed rows.
pub async fn empty_schema(dir: &TempDir, file: &str) -> Arc<dyn Database> {
    let db = open_sqlite(dir, file);
    for table in ManagedTable::ALL {
        db.execute(table.create_sql(db.backend()), &[]).await.unwrap();
    }
    db
}

/// Insert one row and return its key; works on both backends.
pub async fn insert(db: &dyn Database, sql: &str, params: &[Value]) -> i64 {
    db.execute(&format!("{sql} RETURNING id"), params)
        .await
        .unwrap()
        .inserted_id
        .unwrap()
}

pub async fn add_user(db: &dyn Database, staff_id: &str, email: &str) -> i64 {
    insert(
        db,
        "INSERT INTO users (staffId, email, passwordHash, name, status, accountScopes, createdAt) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        &[
            json!(staff_id),
            json!(email),
            json!("$argon2id$fixture"),
            json!(format!("User {staff_id}")),
            json!("approved"),
            json!(["north", "east"]),
            json!("2024-01-02 03:04:05"),
        ],
    )
    .await
}

pub async fn add_contribution(db: &dyn Database, user_id: i64, title: &str, period: &str) -> i64 {
    insert(
        db,
        "INSERT INTO contributions (userId, title, impactEstimate, periodTag, year, status, saleApproval) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        &[
            json!(user_id),
            json!(title),
            json!(1250.5),
            json!(period),
            json!(tally_core::year_from_period(period)),
            json!("submitted"),
            json!({"approvedBy": "lead", "ok": true}),
        ],
    )
    .await
}

pub async fn add_project(db: &dyn Database, user_id: i64, status: &str) -> i64 {
    insert(
        db,
        "INSERT INTO complex_projects (userId, title, status, successFactors, year) VALUES (?, ?, ?, ?, ?)",
        &[
            json!(user_id),
            json!("Migration"),
            json!(status),
            json!("[\"sponsor\"]"),
            json!(2024),
        ],
    )
    .await
}

pub async fn count(db: &dyn Database, table: &str) -> i64 {
    let row = db
        .query_one(&format!("SELECT COUNT(*) AS n FROM {table}"), &[])
        .await
        .unwrap()
        .unwrap();
    tally_store::database::row_i64(&row, "n").unwrap()
}
