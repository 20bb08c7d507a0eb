use super::{DatabaseAdapter, update_assignments};
use core_types::{ColumnSchema, ColumnType, Engine, TableSchema};

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresAdapter;

impl DatabaseAdapter for PostgresAdapter {
    fn engine(&self) -> Engine {
        Engine::Postgresql
    }

    fn map_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::String => "VARCHAR(255)",
            ColumnType::Integer => "INTEGER",
            ColumnType::Bigint => "BIGINT",
            ColumnType::Float => "REAL",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Decimal => "NUMERIC",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Datetime => "TIMESTAMPTZ",
            ColumnType::Date => "DATE",
            ColumnType::Time => "TIME",
            ColumnType::Uuid => "UUID",
            ColumnType::Json => "JSONB",
            ColumnType::Text => "TEXT",
        }
    }

    fn type_aliases(&self, column_type: ColumnType) -> &'static [&'static str] {
        match column_type {
            ColumnType::String => &["character varying", "varchar", "character", "text"],
            ColumnType::Integer => &["integer", "int4", "int"],
            ColumnType::Bigint => &["bigint", "int8"],
            ColumnType::Float => &["real", "float4"],
            ColumnType::Double => &["double precision", "float8"],
            ColumnType::Decimal => &["numeric", "decimal"],
            ColumnType::Boolean => &["boolean", "bool"],
            ColumnType::Datetime => &[
                "timestamp with time zone",
                "timestamptz",
                "timestamp without time zone",
                "timestamp",
            ],
            ColumnType::Date => &["date"],
            ColumnType::Time => &["time without time zone", "time", "time with time zone"],
            ColumnType::Uuid => &["uuid"],
            ColumnType::Json => &["jsonb", "json"],
            ColumnType::Text => &["text", "character varying", "varchar"],
        }
    }

    // Values travel as integers, floats, booleans or text; the cast lets the
    // server convert text into uuid, jsonb, numeric and temporal columns.
    fn placeholder(&self, index: usize, column_type: ColumnType) -> String {
        format!("${index}::{}", self.map_type(column_type))
    }

    fn select_expression(&self, column: &ColumnSchema) -> String {
        let quoted = self.quote_identifier(&column.name);
        match column.column_type {
            ColumnType::Integer | ColumnType::Bigint => format!("CAST({quoted} AS BIGINT)"),
            ColumnType::Float | ColumnType::Double => {
                format!("CAST({quoted} AS DOUBLE PRECISION)")
            }
            ColumnType::Boolean => quoted,
            _ => format!("CAST({quoted} AS TEXT)"),
        }
    }

    fn upsert_clause(&self, table: &TableSchema, columns: &[&ColumnSchema]) -> String {
        let keys: Vec<String> = table
            .primary_key_columns()
            .map(|c| self.quote_identifier(&c.name))
            .collect();
        let assignments = update_assignments(self, columns, |c| format!("EXCLUDED.{c}"));
        if assignments.is_empty() {
            format!("ON CONFLICT ({}) DO NOTHING", keys.join(", "))
        } else {
            format!(
                "ON CONFLICT ({}) DO UPDATE SET {}",
                keys.join(", "),
                assignments.join(", ")
            )
        }
    }

    fn introspection_query(&self) -> &'static str {
        "SELECT CAST(table_name AS TEXT) AS table_name, \
                CAST(column_name AS TEXT) AS column_name, \
                CAST(data_type AS TEXT) AS data_type \
         FROM information_schema.columns \
         WHERE table_schema = current_schema() \
         ORDER BY table_name, ordinal_position"
    }

    fn session_statements(&self) -> &'static [&'static str] {
        &[
            "SET TIME ZONE 'UTC'",
            "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL READ COMMITTED",
        ]
    }
}
