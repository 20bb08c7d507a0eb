//! Engine adapters.
//!
//! Every engine-specific decision (type names, identifier quoting, placeholder
//! syntax, DDL rendering, upsert syntax, schema introspection and session
//! tuning) lives behind [`DatabaseAdapter`]. The rest of the crate holds one
//! `Arc<dyn DatabaseAdapter>` chosen from the configured [`Engine`] and never
//! branches on the engine itself.

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MysqlAdapter;
pub use postgres::PostgresAdapter;
pub use sqlite::SqliteAdapter;

use crate::values::{self, SqlValue};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use core_types::{
    ColumnSchema, ColumnType, ConflictPolicy, Engine, Migration, MigrationStep, QueryParams,
    Record, TableSchema,
};
use serde_json::Value;
use sqlx::AnyConnection;
use std::fmt;
use std::sync::Arc;

/// A SQL statement together with the values bound to its placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Returns the adapter for `engine`.
pub fn adapter_for(engine: Engine) -> Arc<dyn DatabaseAdapter> {
    match engine {
        Engine::Postgresql => Arc::new(PostgresAdapter),
        Engine::Mysql => Arc::new(MysqlAdapter),
        Engine::Sqlite => Arc::new(SqliteAdapter),
    }
}

#[async_trait]
pub trait DatabaseAdapter: Send + Sync + fmt::Debug {
    fn engine(&self) -> Engine;

    /// The engine type a generic column type is stored as. Total over
    /// [`ColumnType`].
    fn map_type(&self, column_type: ColumnType) -> &'static str;

    /// Engine type names (lower case, without length or precision) that the
    /// introspection query may report for a column declared as `column_type`.
    fn type_aliases(&self, column_type: ColumnType) -> &'static [&'static str];

    /// Bind placeholder for the `index`-th (1-based) parameter.
    fn placeholder(&self, index: usize, column_type: ColumnType) -> String;

    /// The projection expression for `column`, cast where needed so every
    /// value comes back as an integer, float, boolean or text.
    fn select_expression(&self, column: &ColumnSchema) -> String;

    /// The clause appended to an insert under `ConflictPolicy::Upsert`.
    fn upsert_clause(&self, table: &TableSchema, columns: &[&ColumnSchema]) -> String;

    /// Returns `(table_name, column_name, data_type)` text rows for every
    /// column of every user table visible to the connection.
    fn introspection_query(&self) -> &'static str;

    /// Session statements run on every new physical connection.
    fn session_statements(&self) -> &'static [&'static str];

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn begin_statement(&self) -> &'static str {
        "BEGIN"
    }

    fn boolean_literal(&self, value: bool) -> &'static str {
        if value { "TRUE" } else { "FALSE" }
    }

    /// How a UTC datetime is written when bound or used as a default.
    fn datetime_literal(&self, value: DateTime<Utc>) -> String {
        value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    /// Whether the engine reports `live_type` for a column declared as `declared`.
    fn type_matches(&self, declared: ColumnType, live_type: &str) -> bool {
        let live = live_type.trim().to_ascii_lowercase();
        let base = live.split('(').next().unwrap_or_default().trim();
        self.type_aliases(declared).contains(&base)
    }

    /// One-time tuning of a freshly opened connection. Safe to repeat.
    async fn initialize_engine(&self, conn: &mut AnyConnection) -> Result<(), sqlx::Error> {
        for statement in self.session_statements() {
            sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(statement)).await?;
        }
        Ok(())
    }

    fn render_default(&self, column: &ColumnSchema, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => self.boolean_literal(*b).to_string(),
            Value::Number(n) => match column.column_type {
                ColumnType::Decimal => quote_literal(&n.to_string()),
                _ => n.to_string(),
            },
            Value::String(s) => match column.column_type {
                ColumnType::Datetime => match DateTime::parse_from_rfc3339(s) {
                    Ok(dt) => quote_literal(&self.datetime_literal(dt.with_timezone(&Utc))),
                    Err(_) => quote_literal(s),
                },
                _ => quote_literal(s),
            },
            other => quote_literal(&other.to_string()),
        }
    }

    fn column_definition(&self, column: &ColumnSchema) -> String {
        let mut definition = format!(
            "{} {}",
            self.quote_identifier(&column.name),
            self.map_type(column.column_type)
        );
        if !column.accepts_null() {
            definition.push_str(" NOT NULL");
        }
        if column.unique && !column.primary_key {
            definition.push_str(" UNIQUE");
        }
        if let Some(default) = &column.default {
            definition.push_str(" DEFAULT ");
            definition.push_str(&self.render_default(column, default));
        }
        definition
    }

    fn generate_create_table(&self, table: &TableSchema) -> String {
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("    {}", self.column_definition(c)))
            .collect();
        let keys: Vec<String> = table
            .primary_key_columns()
            .map(|c| self.quote_identifier(&c.name))
            .collect();
        if !keys.is_empty() {
            parts.push(format!("    PRIMARY KEY ({})", keys.join(", ")));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            self.quote_identifier(&table.name),
            parts.join(",\n")
        )
    }

    fn generate_create_index(&self, table: &str, name: &str, columns: &[String], unique: bool) -> String {
        let columns: Vec<String> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            self.quote_identifier(name),
            self.quote_identifier(table),
            columns.join(", ")
        )
    }

    fn generate_drop_index(&self, _table: &str, name: &str) -> String {
        format!("DROP INDEX IF EXISTS {}", self.quote_identifier(name))
    }

    /// Renders one migration step, or `None` for a raw SQL step aimed at a
    /// different engine.
    fn render_step(&self, step: &MigrationStep) -> Option<String> {
        let sql = match step {
            MigrationStep::CreateTable { table } => self.generate_create_table(table),
            MigrationStep::DropTable { table } => {
                format!("DROP TABLE IF EXISTS {}", self.quote_identifier(table))
            }
            MigrationStep::AddColumn { table, column } => format!(
                "ALTER TABLE {} ADD COLUMN {}",
                self.quote_identifier(table),
                self.column_definition(column)
            ),
            MigrationStep::DropColumn { table, column } => format!(
                "ALTER TABLE {} DROP COLUMN {}",
                self.quote_identifier(table),
                self.quote_identifier(column)
            ),
            MigrationStep::CreateIndex {
                table,
                name,
                columns,
                unique,
            } => self.generate_create_index(table, name, columns, *unique),
            MigrationStep::DropIndex { table, name } => self.generate_drop_index(table, name),
            MigrationStep::Sql { sql, engine } => match engine {
                Some(engine) if *engine != self.engine() => return None,
                _ => sql.clone(),
            },
        };
        Some(sql)
    }

    /// The statements a migration runs on this engine, in step order.
    fn generate_migration_sql(&self, migration: &Migration) -> Vec<String> {
        migration
            .steps
            .iter()
            .filter_map(|step| self.render_step(step))
            .collect()
    }

    fn empty_insert(&self, table: &TableSchema) -> String {
        format!("INSERT INTO {} DEFAULT VALUES", self.quote_identifier(&table.name))
    }

    /// Renders an insert of `record` honoring the table's conflict policy.
    ///
    /// Only declared columns present in the record are written, in declared
    /// order; omitted columns take their database default. The record must
    /// already have passed validation.
    fn generate_insert(&self, table: &TableSchema, record: &Record) -> Statement {
        let columns: Vec<&ColumnSchema> = table
            .columns
            .iter()
            .filter(|c| record.contains_key(&c.name))
            .collect();
        if columns.is_empty() {
            return Statement::new(self.empty_insert(table));
        }

        let mut params = Vec::with_capacity(columns.len());
        let mut names = Vec::with_capacity(columns.len());
        let mut placeholders = Vec::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            names.push(self.quote_identifier(&column.name));
            placeholders.push(self.placeholder(i + 1, column.column_type));
            let value = record.get(&column.name).unwrap_or(&Value::Null);
            params.push(values::encode(self, column.column_type, value));
        }

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_identifier(&table.name),
            names.join(", "),
            placeholders.join(", ")
        );
        if table.on_conflict == ConflictPolicy::Upsert {
            sql.push(' ');
            sql.push_str(&self.upsert_clause(table, &columns));
        }
        Statement { sql, params }
    }

    /// Renders a select for validated query parameters.
    fn generate_select(&self, table: &TableSchema, params: &QueryParams) -> Statement {
        let projection: Vec<&ColumnSchema> = match &params.columns {
            Some(names) => names.iter().filter_map(|n| table.column(n)).collect(),
            None => table.columns.iter().collect(),
        };
        let select_list: Vec<String> = projection
            .iter()
            .map(|c| format!("{} AS {}", self.select_expression(c), self.quote_identifier(&c.name)))
            .collect();

        let mut sql = format!(
            "SELECT {} FROM {}",
            select_list.join(", "),
            self.quote_identifier(&table.name)
        );

        let mut bound = Vec::new();
        let mut conditions = Vec::new();
        for (name, value) in &params.filter {
            let Some(column) = table.column(name) else { continue };
            let quoted = self.quote_identifier(name);
            if value.is_null() {
                conditions.push(format!("{quoted} IS NULL"));
            } else {
                bound.push(values::encode(self, column.column_type, value));
                conditions.push(format!(
                    "{quoted} = {}",
                    self.placeholder(bound.len(), column.column_type)
                ));
            }
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        if let Some(order_by) = &params.order_by {
            sql.push_str(&format!(
                " ORDER BY {} {}",
                self.quote_identifier(order_by),
                if params.descending { "DESC" } else { "ASC" }
            ));
        }
        if let Some(limit) = params.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        Statement { sql, params: bound }
    }
}

/// Single-quoted SQL string literal.
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `"col" = excluded."col"` style assignments for every non-key column.
pub(crate) fn update_assignments<A>(
    adapter: &A,
    columns: &[&ColumnSchema],
    source: impl Fn(&str) -> String,
) -> Vec<String>
where
    A: DatabaseAdapter + ?Sized,
{
    columns
        .iter()
        .filter(|c| !c.primary_key)
        .map(|c| {
            let quoted = adapter.quote_identifier(&c.name);
            format!("{quoted} = {}", source(&quoted))
        })
        .collect()
}
