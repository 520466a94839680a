//! Coercion between JSON values and PostgreSQL wire types
//!
//! Parameters are bound according to the types the server inferred when the
//! statement was prepared, so callers can pass `"42"` for an `INTEGER` column
//! or `1` for a `BOOLEAN` one, the way SQLite's type affinity would accept.
//!
//! Result columns of any type decode: `NUMERIC` aggregates such as `SUM` and
//! `AVG` become JSON numbers, and types without a mapping fall back to text.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Number, Value};
use tokio_postgres::types::{FromSql, ToSql, Type};

use crate::database::Row;
use crate::dialect::ColumnCase;
use crate::error::DbError;

pub(crate) type BoxedParam = Box<dyn ToSql + Sync + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PgKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Oid,
    Text,
    Json,
    TimestampTz,
    Timestamp,
    Date,
    Unsupported,
}

fn kind_of(ty: &Type) -> PgKind {
    if *ty == Type::BOOL {
        PgKind::Bool
    } else if *ty == Type::INT2 {
        PgKind::Int2
    } else if *ty == Type::INT4 {
        PgKind::Int4
    } else if *ty == Type::INT8 {
        PgKind::Int8
    } else if *ty == Type::FLOAT4 {
        PgKind::Float4
    } else if *ty == Type::FLOAT8 {
        PgKind::Float8
    } else if *ty == Type::NUMERIC {
        PgKind::Numeric
    } else if *ty == Type::OID {
        PgKind::Oid
    } else if *ty == Type::TEXT
        || *ty == Type::VARCHAR
        || *ty == Type::BPCHAR
        || *ty == Type::NAME
        || *ty == Type::UNKNOWN
    {
        PgKind::Text
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        PgKind::Json
    } else if *ty == Type::TIMESTAMPTZ {
        PgKind::TimestampTz
    } else if *ty == Type::TIMESTAMP {
        PgKind::Timestamp
    } else if *ty == Type::DATE {
        PgKind::Date
    } else {
        PgKind::Unsupported
    }
}

fn to_bool(value: &Value) -> Result<Option<bool>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            _ => Err(format!("{n} is not 0 or 1")),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Ok(Some(true)),
            "false" | "f" | "0" => Ok(Some(false)),
            other => Err(format!("'{other}' is not a boolean")),
        },
        other => Err(format!("{other} is not a boolean")),
    }
}

fn to_i64(value: &Value) -> Result<Option<i64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(i64::from(*b))),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| format!("{n} is not an integer")),
        Value::String(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("'{s}' is not an integer: {e}")),
        other => Err(format!("{other} is not an integer")),
    }
}

fn to_narrow<T: TryFrom<i64>>(value: &Value) -> Result<Option<T>, String> {
    to_i64(value)?
        .map(|i| T::try_from(i).map_err(|_| format!("{i} is out of range")))
        .transpose()
}

fn to_f64(value: &Value) -> Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("{n} is not a float")),
        Value::String(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("'{s}' is not a number: {e}")),
        other => Err(format!("{other} is not a number")),
    }
}

fn to_decimal(value: &Value) -> Result<Option<Decimal>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(Decimal::from(i64::from(*b)))),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => Ok(Some(Decimal::from(i))),
            (None, Some(u), _) => Ok(Some(Decimal::from(u))),
            (None, None, Some(f)) => Decimal::try_from(f)
                .map(Some)
                .map_err(|e| format!("{n} is not a decimal: {e}")),
            _ => Err(format!("{n} is not a decimal")),
        },
        Value::String(s) => Decimal::from_str(s.trim())
            .map(Some)
            .map_err(|e| format!("'{s}' is not a decimal: {e}")),
        other => Err(format!("{other} is not a decimal")),
    }
}

fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn to_json(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        // JSON kept in text columns elsewhere arrives as a string
        Value::String(s) => Some(serde_json::from_str(s).unwrap_or_else(|_| value.clone())),
        other => Some(other.clone()),
    }
}

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%d"]
        .iter()
        .find_map(|format| {
            NaiveDateTime::parse_from_str(s, format).ok().or_else(|| {
                NaiveDate::parse_from_str(s, format)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
        })
}

/// RFC 3339, or SQLite's `CURRENT_TIMESTAMP` form read as UTC.
fn to_timestamptz(value: &Value) -> Result<Option<DateTime<Utc>>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| parse_naive(s).map(|naive| naive.and_utc()))
            .map(Some)
            .ok_or_else(|| format!("'{s}' is not a timestamp")),
        other => Err(format!("{other} is not a timestamp")),
    }
}

fn to_timestamp(value: &Value) -> Result<Option<NaiveDateTime>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => parse_naive(s)
            .or_else(|| {
                DateTime::parse_from_rfc3339(s.trim())
                    .ok()
                    .map(|dt| dt.naive_utc())
            })
            .map(Some)
            .ok_or_else(|| format!("'{s}' is not a timestamp")),
        other => Err(format!("{other} is not a timestamp")),
    }
}

fn to_date(value: &Value) -> Result<Option<NaiveDate>, String> {
    to_timestamp(value).map(|ts| ts.map(|ts| ts.date()))
}

fn coerce(index: usize, ty: &Type, value: &Value) -> Result<BoxedParam, DbError> {
    let fail = |message: String| DbError::Bind {
        index,
        expected: ty.name().to_string(),
        message,
    };

    let param: BoxedParam = match kind_of(ty) {
        PgKind::Bool => Box::new(to_bool(value).map_err(fail)?),
        PgKind::Int2 => Box::new(to_narrow::<i16>(value).map_err(fail)?),
        PgKind::Int4 => Box::new(to_narrow::<i32>(value).map_err(fail)?),
        PgKind::Int8 => Box::new(to_i64(value).map_err(fail)?),
        PgKind::Float4 => Box::new(to_f64(value).map_err(fail)?.map(|f| f as f32)),
        PgKind::Float8 => Box::new(to_f64(value).map_err(fail)?),
        PgKind::Numeric => Box::new(to_decimal(value).map_err(fail)?),
        PgKind::Oid => Box::new(to_narrow::<u32>(value).map_err(fail)?),
        PgKind::Text => Box::new(to_text(value)),
        PgKind::Json => Box::new(to_json(value)),
        PgKind::TimestampTz => Box::new(to_timestamptz(value).map_err(fail)?),
        PgKind::Timestamp => Box::new(to_timestamp(value).map_err(fail)?),
        PgKind::Date => Box::new(to_date(value).map_err(fail)?),
        PgKind::Unsupported => return Err(fail("unsupported parameter type".to_string())),
    };
    Ok(param)
}

/// Coerce every parameter to the type the prepared statement expects.
pub(crate) fn coerce_params(types: &[Type], params: &[Value]) -> Result<Vec<BoxedParam>, DbError> {
    if types.len() != params.len() {
        return Err(DbError::ParameterCount {
            expected: types.len(),
            supplied: params.len(),
        });
    }
    types
        .iter()
        .zip(params)
        .enumerate()
        .map(|(i, (ty, value))| coerce(i + 1, ty, value))
        .collect()
}

pub(crate) fn as_refs(params: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

fn float(f: Option<f64>) -> Value {
    f.and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Whole decimals become JSON integers, the rest JSON floats.
fn numeric(d: Decimal) -> Value {
    let d = d.normalize();
    if d.scale() == 0 {
        if let Some(i) = d.to_i64() {
            return Value::from(i);
        }
    }
    match d.to_f64().and_then(Number::from_f64) {
        Some(n) => Value::Number(n),
        None => Value::String(d.to_string()),
    }
}

/// Any column type, read as UTF-8 text or `\x`-prefixed hex.
struct RawText(String);

impl<'a> FromSql<'a> for RawText {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(match std::str::from_utf8(raw) {
            Ok(text) => RawText(text.to_string()),
            Err(_) => {
                let hex: String = raw.iter().map(|b| format!("{b:02x}")).collect();
                RawText(format!("\\x{hex}"))
            }
        })
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn decode_column(row: &tokio_postgres::Row, index: usize, column: &str) -> Result<Value, DbError> {
    let ty = row.columns()[index].type_();
    let decode_err = |e: tokio_postgres::Error| DbError::Decode {
        column: column.to_string(),
        message: e.to_string(),
    };

    let value = match kind_of(ty) {
        PgKind::Bool => row
            .try_get::<_, Option<bool>>(index)
            .map_err(decode_err)?
            .map(Value::Bool),
        PgKind::Int2 => row
            .try_get::<_, Option<i16>>(index)
            .map_err(decode_err)?
            .map(Value::from),
        PgKind::Int4 => row
            .try_get::<_, Option<i32>>(index)
            .map_err(decode_err)?
            .map(Value::from),
        PgKind::Int8 => row
            .try_get::<_, Option<i64>>(index)
            .map_err(decode_err)?
            .map(Value::from),
        PgKind::Float4 => Some(float(
            row.try_get::<_, Option<f32>>(index)
                .map_err(decode_err)?
                .map(f64::from),
        )),
        PgKind::Float8 => Some(float(
            row.try_get::<_, Option<f64>>(index).map_err(decode_err)?,
        )),
        PgKind::Numeric => row
            .try_get::<_, Option<Decimal>>(index)
            .map_err(decode_err)?
            .map(numeric),
        PgKind::Oid => row
            .try_get::<_, Option<u32>>(index)
            .map_err(decode_err)?
            .map(Value::from),
        PgKind::Text => row
            .try_get::<_, Option<String>>(index)
            .map_err(decode_err)?
            .map(Value::String),
        PgKind::Json => row.try_get::<_, Option<Value>>(index).map_err(decode_err)?,
        PgKind::TimestampTz => row
            .try_get::<_, Option<DateTime<Utc>>>(index)
            .map_err(decode_err)?
            .map(|ts| Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))),
        PgKind::Timestamp => row
            .try_get::<_, Option<NaiveDateTime>>(index)
            .map_err(decode_err)?
            .map(|ts| Value::String(ts.to_string())),
        PgKind::Date => row
            .try_get::<_, Option<NaiveDate>>(index)
            .map_err(decode_err)?
            .map(|d| Value::String(d.to_string())),
        PgKind::Unsupported => {
            tracing::trace!(column, ty = ty.name(), "Decoding column as raw text");
            row.try_get::<_, Option<RawText>>(index)
                .map_err(decode_err)?
                .map(|RawText(text)| Value::String(text))
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Decode a result row with canonical column names.
pub(crate) fn decode_row(row: &tokio_postgres::Row, case: &ColumnCase) -> Result<Row, DbError> {
    let mut record = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let name = case.normalize(column.name());
        let value = decode_column(row, index, &name)?;
        record.insert(name, value);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerces_loose_inputs() {
        assert_eq!(to_bool(&json!(1)), Ok(Some(true)));
        assert_eq!(to_bool(&json!("false")), Ok(Some(false)));
        assert!(to_bool(&json!(2)).is_err());
        assert_eq!(to_i64(&json!("42")), Ok(Some(42)));
        assert_eq!(to_i64(&json!(3.0)), Ok(Some(3)));
        assert!(to_i64(&json!(3.5)).is_err());
        assert_eq!(to_narrow::<i32>(&json!(2024)), Ok(Some(2024)));
        assert!(to_narrow::<i16>(&json!(100_000)).is_err());
        assert_eq!(to_f64(&json!("1.25")), Ok(Some(1.25)));
        assert_eq!(to_text(&json!(["a"])), Some("[\"a\"]".to_string()));
        assert_eq!(to_text(&json!(null)), None);
        assert_eq!(to_json(&json!("{\"a\":1}")), Some(json!({"a": 1})));
    }

    #[test]
    fn test_numeric_results_become_numbers() {
        assert_eq!(numeric(Decimal::from_str("42").unwrap()), json!(42));
        assert_eq!(numeric(Decimal::from_str("2024.000").unwrap()), json!(2024));
        assert_eq!(numeric(Decimal::from_str("2023.5").unwrap()), json!(2023.5));
        assert_eq!(numeric(Decimal::from_str("-0.25").unwrap()), json!(-0.25));
        assert_eq!(numeric(Decimal::ZERO), json!(0));

        assert_eq!(to_decimal(&json!(7)), Ok(Some(Decimal::from(7))));
        assert_eq!(to_decimal(&json!("19.99")), Ok(Some(Decimal::from_str("19.99").unwrap())));
        assert_eq!(to_decimal(&json!(null)), Ok(None));
        assert!(to_decimal(&json!("lots")).is_err());

        let bound = coerce_params(&[Type::NUMERIC, Type::OID], &[json!(1.5), json!(16384)]).unwrap();
        assert_eq!(bound.len(), 2);
    }

    #[test]
    fn test_unmapped_types_decode_as_text() {
        let RawText(text) = RawText::from_sql(&Type::INET, b"10.0.0.1").unwrap();
        assert_eq!(text, "10.0.0.1");
        let RawText(hex) = RawText::from_sql(&Type::UUID, &[0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert_eq!(hex, "\\xdeadbeef");
        assert!(RawText::accepts(&Type::TS_VECTOR));
    }

    #[test]
    fn test_timestamp_forms() {
        let rfc = to_timestamptz(&json!("2024-03-01T10:20:30Z")).unwrap().unwrap();
        let sqlite = to_timestamptz(&json!("2024-03-01 10:20:30")).unwrap().unwrap();
        assert_eq!(rfc, sqlite);
        assert_eq!(
            rfc.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            "2024-03-01T10:20:30Z"
        );
        assert!(to_timestamptz(&json!("yesterday")).is_err());
        assert_eq!(
            to_date(&json!("2024-03-01")).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
    }

    #[test]
    fn test_coerce_params_reports_position() {
        let err = coerce_params(&[Type::TEXT, Type::INT8], &[json!("a"), json!("x")])
            .err()
            .unwrap();
        assert!(matches!(err, DbError::Bind { index: 2, ref expected, .. } if expected == "int8"));

        let err = coerce_params(&[Type::TEXT], &[]).err().unwrap();
        assert!(matches!(
            err,
            DbError::ParameterCount {
                expected: 1,
                supplied: 0
            }
        ));

        let bound = coerce_params(&[Type::BOOL, Type::TIMESTAMPTZ], &[json!(0), json!(null)]).unwrap();
        assert_eq!(as_refs(&bound).len(), 2);
    }
}
