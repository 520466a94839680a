//! Conversion between JSON values and SQLite storage classes

use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Number, Value};

use crate::database::Row;
use crate::dialect::ColumnCase;
use crate::error::DbError;

/// Bind a JSON value. Booleans become 0/1; arrays and objects are stored as
/// their JSON text.
pub(crate) fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

pub(crate) fn from_sql(column: &str, value: ValueRef<'_>) -> Result<Value, DbError> {
    match value {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(i) => Ok(Value::from(i)),
        ValueRef::Real(f) => Ok(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)),
        ValueRef::Text(bytes) => Ok(Value::String(String::from_utf8_lossy(bytes).into_owned())),
        ValueRef::Blob(_) => Err(DbError::Decode {
            column: column.to_string(),
            message: "binary columns are not supported".to_string(),
        }),
    }
}

/// Run a prepared statement and collect rows with canonical column names.
pub(crate) fn collect_rows(
    stmt: &mut rusqlite::Statement<'_>,
    params: &[Value],
    case: &ColumnCase,
) -> Result<Vec<Row>, DbError> {
    let names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(|name| case.normalize(name))
        .collect();

    let mut rows = stmt.query(rusqlite::params_from_iter(params.iter().map(to_sql)))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (index, name) in names.iter().enumerate() {
            record.insert(name.clone(), from_sql(name, row.get_ref(index)?)?);
        }
        out.push(record);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_binding_conversions() {
        assert_eq!(to_sql(&json!(true)), SqlValue::Integer(1));
        assert_eq!(to_sql(&json!(42)), SqlValue::Integer(42));
        assert_eq!(to_sql(&json!(1.5)), SqlValue::Real(1.5));
        assert_eq!(to_sql(&json!(null)), SqlValue::Null);
        assert_eq!(
            to_sql(&json!(["a", "b"])),
            SqlValue::Text("[\"a\",\"b\"]".to_string())
        );
    }

    #[test]
    fn test_collect_rows_normalizes_names() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let case = ColumnCase::new(["staffId"]);
        let mut stmt = conn
            .prepare("SELECT ? AS STAFFID, ? AS score, NULL AS missing")
            .unwrap();
        let rows = collect_rows(&mut stmt, &[json!("S-1"), json!(2.5)], &case).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["staffId"], json!("S-1"));
        assert_eq!(rows[0]["score"], json!(2.5));
        assert_eq!(rows[0]["missing"], Value::Null);
    }

    #[test]
    fn test_blob_is_rejected() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("SELECT x'00ff' AS data").unwrap();
        let err = collect_rows(&mut stmt, &[], &ColumnCase::default()).unwrap_err();
        assert!(matches!(err, DbError::Decode { ref column, .. } if column == "data"));
    }
}
