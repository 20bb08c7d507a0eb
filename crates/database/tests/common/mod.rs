//! Shared fixtures for the SQLite-backed integration tests.

#![allow(dead_code)]

use configuration::{DatabaseConfig, PoolSettings};
use core_types::{
    ColumnSchema, ColumnType, ConflictPolicy, Engine, Migration, MigrationStep, Record, TableSchema,
};
use serde_json::Value;
use std::path::Path;

/// A DSN for a fresh database file inside `dir`.
pub fn sqlite_url(dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", dir.join("strata.db").display())
}

pub fn pool_settings(max_connections: u32) -> PoolSettings {
    PoolSettings {
        min_connections: 1,
        max_connections,
        connection_timeout_seconds: 5,
        ..PoolSettings::default()
    }
}

/// `users(id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT UNIQUE)`.
pub fn users(policy: ConflictPolicy) -> TableSchema {
    TableSchema::new(
        "users",
        vec![
            ColumnSchema::new("id", ColumnType::Integer).primary_key(),
            ColumnSchema::new("name", ColumnType::Text).not_null(),
            ColumnSchema::new("email", ColumnType::Text).unique(),
        ],
    )
    .with_conflict_policy(policy)
}

/// A table with one column of every generic type.
pub fn products() -> TableSchema {
    TableSchema::new(
        "products",
        vec![
            ColumnSchema::new("id", ColumnType::Bigint).primary_key(),
            ColumnSchema::new("sku", ColumnType::Uuid).not_null().unique(),
            ColumnSchema::new("name", ColumnType::String).not_null(),
            ColumnSchema::new("price", ColumnType::Decimal),
            ColumnSchema::new("in_stock", ColumnType::Boolean),
            ColumnSchema::new("rating", ColumnType::Double),
            ColumnSchema::new("weight", ColumnType::Float),
            ColumnSchema::new("quantity", ColumnType::Integer),
            ColumnSchema::new("released_on", ColumnType::Date),
            ColumnSchema::new("restocked_at", ColumnType::Datetime),
            ColumnSchema::new("opens_at", ColumnType::Time),
            ColumnSchema::new("attrs", ColumnType::Json),
            ColumnSchema::new("notes", ColumnType::Text),
        ],
    )
}

/// A config whose migrations create every given table as version 1.
pub fn config_with_tables(dir: &Path, tables: Vec<TableSchema>) -> DatabaseConfig {
    let steps = tables
        .iter()
        .cloned()
        .map(|table| MigrationStep::CreateTable { table })
        .collect();
    DatabaseConfig::new(Engine::Sqlite, sqlite_url(dir))
        .with_pool(pool_settings(4))
        .with_tables(tables)
        .with_migrations(vec![Migration::new(1, "create tables", steps)])
}

pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
