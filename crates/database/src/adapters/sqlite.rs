use super::{DatabaseAdapter, update_assignments};
use core_types::{ColumnSchema, ColumnType, Engine, TableSchema};

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteAdapter;

impl DatabaseAdapter for SqliteAdapter {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    // Decimals are stored as TEXT so their exact representation survives.
    fn map_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::String => "VARCHAR(255)",
            ColumnType::Integer => "INTEGER",
            ColumnType::Bigint => "BIGINT",
            ColumnType::Float => "REAL",
            ColumnType::Double => "DOUBLE",
            ColumnType::Decimal => "TEXT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Datetime => "DATETIME",
            ColumnType::Date => "DATE",
            ColumnType::Time => "TIME",
            ColumnType::Uuid => "CHAR(36)",
            ColumnType::Json => "TEXT",
            ColumnType::Text => "TEXT",
        }
    }

    fn type_aliases(&self, column_type: ColumnType) -> &'static [&'static str] {
        match column_type {
            ColumnType::String => &["varchar", "text", "char", "character", "nvarchar", "clob"],
            ColumnType::Integer => &["integer", "int"],
            ColumnType::Bigint => &["bigint", "integer", "int"],
            ColumnType::Float => &["real", "float"],
            ColumnType::Double => &["double", "double precision", "real"],
            ColumnType::Decimal => &["text", "decimal", "numeric"],
            ColumnType::Boolean => &["boolean", "bool", "integer"],
            ColumnType::Datetime => &["datetime", "timestamp", "text"],
            ColumnType::Date => &["date", "text"],
            ColumnType::Time => &["time", "text"],
            ColumnType::Uuid => &["char", "varchar", "text"],
            ColumnType::Json => &["text", "json"],
            ColumnType::Text => &["text", "clob", "varchar"],
        }
    }

    fn placeholder(&self, _index: usize, _column_type: ColumnType) -> String {
        "?".to_string()
    }

    // BOOLEAN and the temporal declared types have no runtime-neutral
    // representation, so they are read through a cast.
    fn select_expression(&self, column: &ColumnSchema) -> String {
        let quoted = self.quote_identifier(&column.name);
        match column.column_type {
            ColumnType::Boolean => format!("CAST({quoted} AS INTEGER)"),
            ColumnType::Datetime | ColumnType::Date | ColumnType::Time => {
                format!("CAST({quoted} AS TEXT)")
            }
            _ => quoted,
        }
    }

    fn begin_statement(&self) -> &'static str {
        "BEGIN IMMEDIATE"
    }

    fn boolean_literal(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    fn upsert_clause(&self, table: &TableSchema, columns: &[&ColumnSchema]) -> String {
        let keys: Vec<String> = table
            .primary_key_columns()
            .map(|c| self.quote_identifier(&c.name))
            .collect();
        let assignments = update_assignments(self, columns, |c| format!("excluded.{c}"));
        if assignments.is_empty() {
            format!("ON CONFLICT({}) DO NOTHING", keys.join(", "))
        } else {
            format!(
                "ON CONFLICT({}) DO UPDATE SET {}",
                keys.join(", "),
                assignments.join(", ")
            )
        }
    }

    fn introspection_query(&self) -> &'static str {
        "SELECT CAST(m.name AS TEXT) AS table_name, \
                CAST(p.name AS TEXT) AS column_name, \
                CAST(p.type AS TEXT) AS data_type \
         FROM sqlite_master AS m \
         JOIN pragma_table_info(m.name) AS p \
         WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%' \
         ORDER BY m.name, p.cid"
    }

    fn session_statements(&self) -> &'static [&'static str] {
        &[
            "PRAGMA foreign_keys = ON",
            "PRAGMA journal_mode = WAL",
            "PRAGMA synchronous = NORMAL",
            "PRAGMA busy_timeout = 5000",
        ]
    }
}
