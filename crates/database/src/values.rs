//! Moving JSON values in and out of the database.
//!
//! Every value crosses the driver boundary as one of five shapes (null,
//! boolean, integer, float, text). Adapters cast on the way in (placeholders)
//! and on the way out (select expressions) so the engine does the remaining
//! conversion; this module decides the shape from the declared column type.

use crate::adapters::DatabaseAdapter;
use crate::error::DbError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use core_types::{ColumnSchema, ColumnType, Record};
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use sqlx::any::{Any, AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::{Decode, Row, Type};
use std::str::FromStr;

/// A value ready to be bound to a placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Converts a validated JSON value into its bound form for a column of `column_type`.
pub(crate) fn encode<A>(adapter: &A, column_type: ColumnType, value: &Value) -> SqlValue
where
    A: DatabaseAdapter + ?Sized,
{
    match (column_type, value) {
        (_, Value::Null) => SqlValue::Null,
        (ColumnType::Json, other) => SqlValue::Text(other.to_string()),
        (ColumnType::Boolean, Value::Bool(b)) => SqlValue::Bool(*b),
        (ColumnType::Integer | ColumnType::Bigint, Value::Number(n)) => n
            .as_i64()
            .map_or_else(|| SqlValue::Text(n.to_string()), SqlValue::Int),
        (ColumnType::Float | ColumnType::Double, Value::Number(n)) => n
            .as_f64()
            .map_or_else(|| SqlValue::Text(n.to_string()), SqlValue::Float),
        (ColumnType::Datetime, Value::String(s)) => match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => SqlValue::Text(adapter.datetime_literal(dt.with_timezone(&Utc))),
            Err(_) => SqlValue::Text(s.clone()),
        },
        (_, Value::String(s)) => SqlValue::Text(s.clone()),
        (_, Value::Number(n)) => SqlValue::Text(n.to_string()),
        (_, Value::Bool(b)) => SqlValue::Bool(*b),
        (_, other) => SqlValue::Text(other.to_string()),
    }
}

/// Binds `params` to `query` in order.
pub(crate) fn bind_params<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    params: &[SqlValue],
) -> Query<'q, Any, AnyArguments<'q>> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

/// Decodes the projected `columns` of `row` into a record.
pub(crate) fn decode_row(
    row: &AnyRow,
    table: &str,
    columns: &[&ColumnSchema],
) -> Result<Record, DbError> {
    let mut record = Record::new();
    for column in columns {
        let value = decode_column(row, column).map_err(|reason| DbError::Decode {
            table: table.to_string(),
            column: column.name.clone(),
            reason,
        })?;
        record.insert(column.name.clone(), value);
    }
    Ok(record)
}

fn decode_column(row: &AnyRow, column: &ColumnSchema) -> Result<Value, String> {
    let name = column.name.as_str();
    match column.column_type {
        ColumnType::Boolean => {
            if let Some(v) = try_column::<bool>(row, name) {
                return Ok(v.map_or(Value::Null, Value::Bool));
            }
            if let Some(v) = try_column::<i64>(row, name) {
                return Ok(v.map_or(Value::Null, |n| Value::Bool(n != 0)));
            }
            text_column(row, name, |s| match s.trim().to_ascii_lowercase().as_str() {
                "1" | "t" | "true" => Ok(Value::Bool(true)),
                "0" | "f" | "false" => Ok(Value::Bool(false)),
                other => Err(format!("'{other}' is not a boolean")),
            })
        }
        ColumnType::Integer | ColumnType::Bigint => {
            if let Some(v) = try_column::<i64>(row, name) {
                return Ok(v.map_or(Value::Null, Value::from));
            }
            text_column(row, name, |s| {
                s.trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|e| format!("'{s}' is not an integer: {e}"))
            })
        }
        ColumnType::Float | ColumnType::Double => {
            if let Some(v) = try_column::<f64>(row, name) {
                return v.map_or(Ok(Value::Null), float_value);
            }
            if let Some(v) = try_column::<f32>(row, name) {
                return v.map_or(Ok(Value::Null), |f| float_value(f64::from(f)));
            }
            if let Some(v) = try_column::<i64>(row, name) {
                return v.map_or(Ok(Value::Null), |n| float_value(n as f64));
            }
            text_column(row, name, |s| {
                s.trim()
                    .parse::<f64>()
                    .map_err(|e| format!("'{s}' is not a number: {e}"))
                    .and_then(float_value)
            })
        }
        ColumnType::Decimal => {
            if let Some(v) = try_column::<String>(row, name) {
                return Ok(v.map_or(Value::Null, |s| normalize_decimal(&s)));
            }
            if let Some(v) = try_column::<i64>(row, name) {
                return Ok(v.map_or(Value::Null, |n| Value::String(n.to_string())));
            }
            if let Some(v) = try_column::<f64>(row, name) {
                return Ok(v.map_or(Value::Null, |f| normalize_decimal(&f.to_string())));
            }
            Err("value is neither text nor numeric".to_string())
        }
        ColumnType::Datetime => text_column(row, name, normalize_datetime),
        ColumnType::Date => text_column(row, name, |s| {
            let s = s.trim();
            NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d")
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .map_err(|e| format!("'{s}' is not a date: {e}"))
        }),
        ColumnType::Time => text_column(row, name, |s| {
            let s = s.trim();
            NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
                .map(|t| Value::String(t.format("%H:%M:%S%.f").to_string()))
                .map_err(|e| format!("'{s}' is not a time: {e}"))
        }),
        ColumnType::Json => text_column(row, name, |s| {
            Ok(serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string())))
        }),
        ColumnType::String | ColumnType::Text | ColumnType::Uuid => {
            text_column(row, name, |s| Ok(Value::String(s.to_string())))
        }
    }
}

/// `Some(value)` when the column decodes as `T`, `None` on a type mismatch.
fn try_column<'r, T>(row: &'r AnyRow, name: &str) -> Option<Option<T>>
where
    T: Decode<'r, Any> + Type<Any>,
{
    row.try_get::<Option<T>, _>(name).ok()
}

fn text_column(
    row: &AnyRow,
    name: &str,
    convert: impl FnOnce(&str) -> Result<Value, String>,
) -> Result<Value, String> {
    match row.try_get::<Option<String>, _>(name) {
        Ok(None) => Ok(Value::Null),
        Ok(Some(s)) => convert(&s),
        Err(e) => Err(e.to_string()),
    }
}

fn float_value(value: f64) -> Result<Value, String> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| format!("{value} is not a finite number"))
}

fn normalize_decimal(raw: &str) -> Value {
    let trimmed = raw.trim();
    let parsed = Decimal::from_str(trimmed).or_else(|_| Decimal::from_scientific(trimmed));
    match parsed {
        Ok(d) => Value::String(d.normalize().to_string()),
        Err(_) => Value::String(trimmed.to_string()),
    }
}

/// Accepts RFC 3339 as well as the `YYYY-MM-DD HH:MM:SS[.f][+zz]` forms
/// engines print, and renders UTC RFC 3339.
fn normalize_datetime(raw: &str) -> Result<Value, String> {
    let s = raw.trim();
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z").map(|dt| dt.with_timezone(&Utc))
        })
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").map(|n| n.and_utc()))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").map(|n| n.and_utc()))
        .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
        .map_err(|e| format!("'{s}' is not a timestamp: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{PostgresAdapter, SqliteAdapter};
    use serde_json::json;

    #[test]
    fn json_values_are_bound_as_serialized_text() {
        assert_eq!(
            encode(&SqliteAdapter, ColumnType::Json, &json!({"a": [1, 2]})),
            SqlValue::Text(r#"{"a":[1,2]}"#.to_string())
        );
        assert_eq!(
            encode(&SqliteAdapter, ColumnType::Json, &json!("plain")),
            SqlValue::Text(r#""plain""#.to_string())
        );
        assert_eq!(encode(&SqliteAdapter, ColumnType::Json, &Value::Null), SqlValue::Null);
    }

    #[test]
    fn numbers_follow_the_declared_type() {
        assert_eq!(encode(&SqliteAdapter, ColumnType::Bigint, &json!(7)), SqlValue::Int(7));
        assert_eq!(encode(&SqliteAdapter, ColumnType::Double, &json!(2.5)), SqlValue::Float(2.5));
        assert_eq!(
            encode(&SqliteAdapter, ColumnType::Decimal, &json!(2.5)),
            SqlValue::Text("2.5".to_string())
        );
    }

    #[test]
    fn datetimes_are_bound_in_utc() {
        assert_eq!(
            encode(&PostgresAdapter, ColumnType::Datetime, &json!("2024-03-01T14:00:00+02:00")),
            SqlValue::Text("2024-03-01T12:00:00Z".to_string())
        );
    }

    #[test]
    fn engine_timestamps_normalize_to_rfc3339() {
        assert_eq!(
            normalize_datetime("2024-03-01 12:00:00+00").unwrap(),
            json!("2024-03-01T12:00:00Z")
        );
        assert_eq!(
            normalize_datetime("2024-03-01 12:00:00.500000").unwrap(),
            json!("2024-03-01T12:00:00.500Z")
        );
        assert_eq!(
            normalize_datetime("2024-03-01T12:00:00Z").unwrap(),
            json!("2024-03-01T12:00:00Z")
        );
        assert!(normalize_datetime("yesterday").is_err());
    }

    #[test]
    fn decimals_drop_trailing_zeros() {
        assert_eq!(normalize_decimal("12.5000000000"), json!("12.5"));
        assert_eq!(normalize_decimal("19.99"), json!("19.99"));
        assert_eq!(normalize_decimal("n/a"), json!("n/a"));
    }
}
