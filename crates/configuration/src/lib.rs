//! # Strata Configuration
//!
//! Loads the `DatabaseConfig` (engine, DSN, pool bounds, declared schema and
//! migrations), the performance monitor thresholds and the logging setup from
//! a TOML file layered with `STRATA_*` environment variables.

use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use error::ConfigError;
pub use logging::init_tracing;
pub use settings::{
    Config, DatabaseConfig, LogFormat, LoggingConfig, MigrationSettings, MonitorSettings,
    PoolSettings, SchemaSettings, ValidationSettings,
};

/// Prefix of environment variables that override file settings, e.g.
/// `STRATA_DATABASE__CONNECTION_STRING`.
pub const ENV_PREFIX: &str = "STRATA";

/// Loads the application configuration from the `config.toml` file.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from("config.toml")
}

/// Loads, overlays and validates the configuration stored at `path`.
///
/// A `.env` file is honored; `DATABASE_URL` fills the connection string when
/// neither the file nor `STRATA_DATABASE__CONNECTION_STRING` provides one.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();

    let builder = config::Config::builder()
        .add_source(config::File::from(path.as_ref()))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    finish(builder.try_deserialize::<Config>()?)
}

/// Parses and validates a configuration held in memory (TOML).
pub fn parse_config(toml: &str) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .build()?;

    finish(builder.try_deserialize::<Config>()?)
}

fn finish(mut config: Config) -> Result<Config, ConfigError> {
    if config.database.connection_string.trim().is_empty()
        && let Ok(url) = std::env::var("DATABASE_URL")
    {
        config.database.connection_string = url;
    }
    config.database.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{ColumnType, ConflictPolicy, Engine, MigrationStep, MigrationVersion};
    use std::io::Write;

    const SAMPLE: &str = r#"
[database]
type = "sqlite"
connection_string = "sqlite::memory:"
default_table = "users"

[database.pool]
min_connections = 2
max_connections = 4

[[database.schema.tables]]
name = "users"
on_conflict = "upsert"
columns = [
    { name = "id", type = "integer", primary_key = true },
    { name = "name", type = "text", nullable = false },
    { name = "email", type = "text", unique = true },
]

[[database.schema.migrations]]
version = 1
description = "create users"
steps = [
    { op = "sql", sql = "SELECT 1" },
]

[monitor]
slow_query_threshold_ms = 250.0
"#;

    #[test]
    fn parses_a_complete_config() {
        let config = parse_config(SAMPLE).unwrap();
        let db = &config.database;

        assert_eq!(db.engine, Engine::Sqlite);
        assert_eq!(db.pool.min_connections, 2);
        assert_eq!(db.pool.max_connections, 4);
        assert_eq!(db.pool.connection_timeout_seconds, 30);

        let users = &db.schema.tables[0];
        assert_eq!(users.on_conflict, ConflictPolicy::Upsert);
        assert_eq!(users.columns.len(), 3);
        assert!(users.columns[0].primary_key);
        assert!(!users.columns[1].nullable);
        assert_eq!(users.columns[2].column_type, ColumnType::Text);

        let migration = &db.schema.migrations[0];
        assert_eq!(migration.version, MigrationVersion::Number(1));
        assert!(matches!(migration.steps[0], MigrationStep::Sql { .. }));

        assert!(db.migrations.track_applied);
        assert_eq!(config.monitor.slow_query_threshold_ms, 250.0);
        assert_eq!(config.monitor.window_size, 1_000);
    }

    #[test]
    fn unknown_column_types_fail_at_load_time() {
        let toml = SAMPLE.replace(r#"type = "text", nullable"#, r#"type = "money", nullable"#);
        assert!(matches!(parse_config(&toml), Err(ConfigError::LoadError(_))));
    }

    #[test]
    fn unknown_engines_fail_at_load_time() {
        let toml = SAMPLE.replace(r#"type = "sqlite""#, r#"type = "oracle""#);
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn loads_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.database.default_table.as_deref(), Some("users"));
    }
}
