use super::{DatabaseAdapter, update_assignments};
use chrono::{DateTime, Utc};
use core_types::{ColumnSchema, ColumnType, Engine, TableSchema};

#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlAdapter;

impl DatabaseAdapter for MysqlAdapter {
    fn engine(&self) -> Engine {
        Engine::Mysql
    }

    fn map_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::String => "VARCHAR(255)",
            ColumnType::Integer => "INT",
            ColumnType::Bigint => "BIGINT",
            ColumnType::Float => "FLOAT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Decimal => "DECIMAL(38, 10)",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Datetime => "DATETIME(6)",
            ColumnType::Date => "DATE",
            ColumnType::Time => "TIME(6)",
            ColumnType::Uuid => "CHAR(36)",
            ColumnType::Json => "JSON",
            ColumnType::Text => "TEXT",
        }
    }

    fn type_aliases(&self, column_type: ColumnType) -> &'static [&'static str] {
        match column_type {
            ColumnType::String => &["varchar", "char", "text"],
            ColumnType::Integer => &["int", "integer", "mediumint"],
            ColumnType::Bigint => &["bigint"],
            ColumnType::Float => &["float"],
            ColumnType::Double => &["double", "real", "double precision"],
            ColumnType::Decimal => &["decimal", "numeric"],
            ColumnType::Boolean => &["tinyint", "boolean", "bool"],
            ColumnType::Datetime => &["datetime", "timestamp"],
            ColumnType::Date => &["date"],
            ColumnType::Time => &["time"],
            ColumnType::Uuid => &["char", "varchar"],
            // MariaDB reports JSON columns as longtext.
            ColumnType::Json => &["json", "longtext"],
            ColumnType::Text => &["text", "mediumtext", "longtext"],
        }
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize, _column_type: ColumnType) -> String {
        "?".to_string()
    }

    fn select_expression(&self, column: &ColumnSchema) -> String {
        let quoted = self.quote_identifier(&column.name);
        match column.column_type {
            ColumnType::Integer | ColumnType::Bigint | ColumnType::Boolean => {
                format!("CAST({quoted} AS SIGNED)")
            }
            ColumnType::Float | ColumnType::Double => quoted,
            _ => format!("CAST({quoted} AS CHAR)"),
        }
    }

    // DATETIME carries no offset; values are stored as UTC.
    fn datetime_literal(&self, value: DateTime<Utc>) -> String {
        value.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }

    fn generate_create_index(&self, table: &str, name: &str, columns: &[String], unique: bool) -> String {
        let columns: Vec<String> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            self.quote_identifier(name),
            self.quote_identifier(table),
            columns.join(", ")
        )
    }

    fn generate_drop_index(&self, table: &str, name: &str) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.quote_identifier(name),
            self.quote_identifier(table)
        )
    }

    fn empty_insert(&self, table: &TableSchema) -> String {
        format!("INSERT INTO {} () VALUES ()", self.quote_identifier(&table.name))
    }

    fn upsert_clause(&self, table: &TableSchema, columns: &[&ColumnSchema]) -> String {
        let assignments = update_assignments(self, columns, |c| format!("VALUES({c})"));
        if assignments.is_empty() {
            let key = table
                .primary_key_columns()
                .next()
                .map(|c| self.quote_identifier(&c.name))
                .unwrap_or_default();
            format!("ON DUPLICATE KEY UPDATE {key} = {key}")
        } else {
            format!("ON DUPLICATE KEY UPDATE {}", assignments.join(", "))
        }
    }

    fn introspection_query(&self) -> &'static str {
        "SELECT CAST(table_name AS CHAR) AS table_name, \
                CAST(column_name AS CHAR) AS column_name, \
                CAST(data_type AS CHAR) AS data_type \
         FROM information_schema.columns \
         WHERE table_schema = DATABASE() \
         ORDER BY table_name, ordinal_position"
    }

    fn session_statements(&self) -> &'static [&'static str] {
        &[
            "SET NAMES utf8mb4",
            "SET SESSION sql_mode = 'STRICT_ALL_TABLES,NO_ZERO_DATE,NO_ZERO_IN_DATE,ERROR_FOR_DIVISION_BY_ZERO'",
            "SET SESSION time_zone = '+00:00'",
            "SET SESSION TRANSACTION ISOLATION LEVEL READ COMMITTED",
        ]
    }
}
