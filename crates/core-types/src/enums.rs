use crate::error::CoreError;
use chrono::{DateTime, NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The database engines a Store can be configured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[serde(alias = "postgres")]
    Postgresql,
    Mysql,
    Sqlite,
}

impl Engine {
    pub const ALL: [Engine; 3] = [Engine::Postgresql, Engine::Mysql, Engine::Sqlite];

    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Postgresql => "postgresql",
            Engine::Mysql => "mysql",
            Engine::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(Engine::Postgresql),
            "mysql" => Ok(Engine::Mysql),
            "sqlite" => Ok(Engine::Sqlite),
            other => Err(CoreError::UnknownEngine(other.to_string())),
        }
    }
}

/// Engine-independent column types. Every adapter maps each of these to
/// exactly one engine type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Integer,
    Bigint,
    Float,
    Double,
    Decimal,
    Boolean,
    Datetime,
    Date,
    Time,
    Uuid,
    Json,
    Text,
}

/// Maximum length of a `string` column, in characters.
pub const MAX_STRING_LENGTH: usize = 255;

impl ColumnType {
    pub const ALL: [ColumnType; 13] = [
        ColumnType::String,
        ColumnType::Integer,
        ColumnType::Bigint,
        ColumnType::Float,
        ColumnType::Double,
        ColumnType::Decimal,
        ColumnType::Boolean,
        ColumnType::Datetime,
        ColumnType::Date,
        ColumnType::Time,
        ColumnType::Uuid,
        ColumnType::Json,
        ColumnType::Text,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Bigint => "bigint",
            ColumnType::Float => "float",
            ColumnType::Double => "double",
            ColumnType::Decimal => "decimal",
            ColumnType::Boolean => "boolean",
            ColumnType::Datetime => "datetime",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::Uuid => "uuid",
            ColumnType::Json => "json",
            ColumnType::Text => "text",
        }
    }

    /// True for types whose values travel as JSON integers.
    pub fn is_integral(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Bigint)
    }

    /// True for types whose values travel as JSON floating point numbers.
    pub fn is_floating(&self) -> bool {
        matches!(self, ColumnType::Float | ColumnType::Double)
    }

    /// Checks that a non-null JSON value is acceptable for this column type.
    ///
    /// Returns a human readable reason on rejection. `null` is not handled
    /// here; nullability is a property of the column, not of the type.
    pub fn check_value(&self, value: &Value) -> Result<(), String> {
        match self {
            ColumnType::Integer => match value.as_i64() {
                Some(v) if i32::try_from(v).is_ok() => Ok(()),
                Some(v) => Err(format!("{v} does not fit a 32-bit integer")),
                None => Err(expected("an integer", value)),
            },
            ColumnType::Bigint => value
                .as_i64()
                .map(|_| ())
                .ok_or_else(|| expected("a 64-bit integer", value)),
            ColumnType::Float | ColumnType::Double => {
                if value.is_number() {
                    Ok(())
                } else {
                    Err(expected("a number", value))
                }
            }
            ColumnType::Decimal => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(()),
                Value::Number(n) => Decimal::from_str(&n.to_string())
                    .or_else(|_| Decimal::from_scientific(&n.to_string()))
                    .map(|_| ())
                    .map_err(|e| format!("{n} is not a valid decimal: {e}")),
                Value::String(s) => Decimal::from_str(s)
                    .map(|_| ())
                    .map_err(|e| format!("'{s}' is not a valid decimal: {e}")),
                other => Err(expected("a decimal number or numeric string", other)),
            },
            ColumnType::Boolean => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    Err(expected("a boolean", value))
                }
            }
            ColumnType::String => match value.as_str() {
                Some(s) if s.chars().count() <= MAX_STRING_LENGTH => Ok(()),
                Some(s) => Err(format!(
                    "string of {} characters exceeds the {MAX_STRING_LENGTH} character limit",
                    s.chars().count()
                )),
                None => Err(expected("a string", value)),
            },
            ColumnType::Text => value
                .as_str()
                .map(|_| ())
                .ok_or_else(|| expected("a string", value)),
            ColumnType::Datetime => {
                let s = value
                    .as_str()
                    .ok_or_else(|| expected("an RFC 3339 datetime string", value))?;
                DateTime::parse_from_rfc3339(s)
                    .map(|_| ())
                    .map_err(|e| format!("'{s}' is not an RFC 3339 datetime: {e}"))
            }
            ColumnType::Date => {
                let s = value
                    .as_str()
                    .ok_or_else(|| expected("a YYYY-MM-DD date string", value))?;
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map(|_| ())
                    .map_err(|e| format!("'{s}' is not a YYYY-MM-DD date: {e}"))
            }
            ColumnType::Time => {
                let s = value
                    .as_str()
                    .ok_or_else(|| expected("an HH:MM:SS time string", value))?;
                NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
                    .map(|_| ())
                    .map_err(|e| format!("'{s}' is not an HH:MM:SS time: {e}"))
            }
            ColumnType::Uuid => {
                let s = value
                    .as_str()
                    .ok_or_else(|| expected("a UUID string", value))?;
                Uuid::parse_str(s)
                    .map(|_| ())
                    .map_err(|e| format!("'{s}' is not a UUID: {e}"))
            }
            ColumnType::Json => Ok(()),
        }
    }
}

fn expected(what: &str, value: &Value) -> String {
    let found = match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    };
    format!("expected {what}, found {found}")
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ColumnType::ALL
            .into_iter()
            .find(|ty| ty.as_str() == wanted)
            .ok_or(CoreError::UnknownColumnType(wanted))
    }
}

/// What a `store` does when a row with the same primary key already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Surface the constraint violation as an execution error.
    #[default]
    Error,
    /// Overwrite the existing row's non-key columns.
    Upsert,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn engine_parses_aliases() {
        assert_eq!("postgres".parse::<Engine>().unwrap(), Engine::Postgresql);
        assert_eq!("SQLite".parse::<Engine>().unwrap(), Engine::Sqlite);
        assert!(matches!(
            "oracle".parse::<Engine>(),
            Err(CoreError::UnknownEngine(name)) if name == "oracle"
        ));
    }

    #[test]
    fn every_column_type_round_trips_through_its_name() {
        for ty in ColumnType::ALL {
            assert_eq!(ty.as_str().parse::<ColumnType>().unwrap(), ty);
        }
        assert!("varchar2".parse::<ColumnType>().is_err());
    }

    #[test]
    fn integer_rejects_out_of_range_and_fractions() {
        assert!(ColumnType::Integer.check_value(&json!(42)).is_ok());
        assert!(ColumnType::Integer.check_value(&json!(5_000_000_000_i64)).is_err());
        assert!(ColumnType::Bigint.check_value(&json!(5_000_000_000_i64)).is_ok());
        assert!(ColumnType::Integer.check_value(&json!(1.5)).is_err());
        assert!(ColumnType::Integer.check_value(&json!("1")).is_err());
    }

    #[test]
    fn decimal_accepts_numbers_and_numeric_strings() {
        assert!(ColumnType::Decimal.check_value(&json!("12.50")).is_ok());
        assert!(ColumnType::Decimal.check_value(&json!(12.5)).is_ok());
        assert!(ColumnType::Decimal.check_value(&json!(7)).is_ok());
        assert!(ColumnType::Decimal.check_value(&json!("twelve")).is_err());
        assert!(ColumnType::Decimal.check_value(&json!(true)).is_err());
    }

    #[test]
    fn temporal_and_uuid_values_are_parsed() {
        assert!(ColumnType::Datetime.check_value(&json!("2024-03-01T12:00:00Z")).is_ok());
        assert!(ColumnType::Datetime.check_value(&json!("2024-03-01")).is_err());
        assert!(ColumnType::Date.check_value(&json!("2024-03-01")).is_ok());
        assert!(ColumnType::Time.check_value(&json!("23:59:59")).is_ok());
        assert!(ColumnType::Time.check_value(&json!("23:59:59.250")).is_ok());
        assert!(ColumnType::Time.check_value(&json!("25:00:00")).is_err());
        assert!(ColumnType::Uuid
            .check_value(&json!("67e55044-10b1-426f-9247-bb680e5fe0c8"))
            .is_ok());
        assert!(ColumnType::Uuid.check_value(&json!("not-a-uuid")).is_err());
    }

    #[test]
    fn string_length_is_bounded_but_text_is_not() {
        let long = "x".repeat(MAX_STRING_LENGTH + 1);
        assert!(ColumnType::String.check_value(&json!(long)).is_err());
        assert!(ColumnType::Text.check_value(&json!(long)).is_ok());
    }

    #[test]
    fn json_accepts_anything() {
        assert!(ColumnType::Json.check_value(&json!({"a": [1, 2]})).is_ok());
        assert!(ColumnType::Json.check_value(&json!(3)).is_ok());
    }
}
