use crate::error::ConfigError;
use core_types::{Engine, Migration, SchemaDefinition, TableSchema};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Everything a Store needs to reach, shape and check its database.
///
/// Immutable once a Store has been constructed from it.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// The engine kind (`postgresql`, `mysql` or `sqlite`).
    #[serde(rename = "type")]
    pub engine: Engine,
    /// A DSN understood by the engine's client, e.g. `sqlite://data/app.db?mode=rwc`.
    #[serde(default)]
    pub connection_string: String,
    /// Table used by `store` calls that do not name one.
    #[serde(default)]
    pub default_table: Option<String>,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub schema: SchemaSettings,
    #[serde(default)]
    pub migrations: MigrationSettings,
    #[serde(default)]
    pub validation: ValidationSettings,
}

impl DatabaseConfig {
    /// A configuration with default pool, migration and validation settings.
    pub fn new(engine: Engine, connection_string: impl Into<String>) -> Self {
        Self {
            engine,
            connection_string: connection_string.into(),
            default_table: None,
            pool: PoolSettings::default(),
            schema: SchemaSettings::default(),
            migrations: MigrationSettings::default(),
            validation: ValidationSettings::default(),
        }
    }

    pub fn with_tables(mut self, tables: Vec<TableSchema>) -> Self {
        self.schema.tables = tables;
        self
    }

    pub fn with_migrations(mut self, migrations: Vec<Migration>) -> Self {
        self.schema.migrations = migrations;
        self
    }

    pub fn with_pool(mut self, pool: PoolSettings) -> Self {
        self.pool = pool;
        self
    }

    /// The declared schema as a `SchemaDefinition`.
    pub fn schema_definition(&self) -> SchemaDefinition {
        SchemaDefinition::new(self.schema.tables.clone())
    }

    /// Rejects configurations that could never produce a usable Store.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection_string.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "database.connection_string must be set (or provide DATABASE_URL)".to_string(),
            ));
        }
        self.pool.validate()?;
        self.schema_definition().check()?;

        if let Some(table) = &self.default_table
            && self.schema.tables.iter().all(|t| &t.name != table)
        {
            return Err(ConfigError::ValidationError(format!(
                "database.default_table '{table}' is not a declared table"
            )));
        }

        let mut versions = HashSet::new();
        for migration in &self.schema.migrations {
            if !versions.insert(&migration.version) {
                return Err(ConfigError::ValidationError(format!(
                    "migration version {} is declared more than once",
                    migration.version
                )));
            }
        }

        if self.migrations.table_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "database.migrations.table_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection pool bounds and timers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub min_connections: u32,
    pub max_connections: u32,
    /// How long `acquire` waits for a free connection (also bounds connecting).
    pub connection_timeout_seconds: u64,
    /// Idle connections older than this are evicted while the pool stays above `min`.
    pub idle_timeout_seconds: u64,
    pub health_check_interval_seconds: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            connection_timeout_seconds: 30,
            idle_timeout_seconds: 600,
            health_check_interval_seconds: 30,
        }
    }
}

impl PoolSettings {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "pool.max_connections must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::ValidationError(format!(
                "pool.min_connections ({}) exceeds pool.max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.connection_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "pool.connection_timeout_seconds must be greater than zero".to_string(),
            ));
        }
        if self.health_check_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "pool.health_check_interval_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// The declared tables and the migrations that produce them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaSettings {
    #[serde(default)]
    pub tables: Vec<TableSchema>,
    #[serde(default)]
    pub migrations: Vec<Migration>,
}

/// How applied migrations are remembered between process restarts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    /// Record applied versions and skip them on later runs. When false every
    /// migration is applied on every setup and its steps must be idempotent.
    pub track_applied: bool,
    pub table_name: String,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            track_applied: true,
            table_name: "_strata_migrations".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// How long a live-schema comparison stays cached.
    pub cache_ttl_seconds: u64,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 300,
        }
    }
}

impl ValidationSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

/// Thresholds and window sizes for the performance monitor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Capacity of the metric ring buffer.
    pub window_size: usize,
    /// Metrics older than this are evicted regardless of capacity.
    pub window_seconds: u64,
    pub slow_query_threshold_ms: f64,
    /// Average acquire time above which a larger pool is recommended.
    pub acquire_time_warning_ms: f64,
    /// Fraction of `max_connections` in use above which a larger pool is recommended.
    pub utilization_warning_ratio: f64,
    /// Query latency that still scores 100 in the health score.
    pub target_query_latency_ms: f64,
    /// Acquire latency that still scores 100 in the health score.
    pub target_acquire_latency_ms: f64,
    /// Cache hit rate below which a caching recommendation is emitted.
    pub min_cache_hit_rate: f64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            window_size: 1_000,
            window_seconds: 3_600,
            slow_query_threshold_ms: 100.0,
            acquire_time_warning_ms: 100.0,
            utilization_warning_ratio: 0.9,
            target_query_latency_ms: 50.0,
            target_acquire_latency_ms: 10.0,
            min_cache_hit_rate: 0.5,
        }
    }
}

impl MonitorSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
    /// When set, logs are also written to a daily rolling file in this directory.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directory: None,
            file_prefix: "strata.log".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{ColumnSchema, ColumnType};

    fn sqlite_config() -> DatabaseConfig {
        DatabaseConfig::new(Engine::Sqlite, "sqlite::memory:").with_tables(vec![TableSchema::new(
            "users",
            vec![ColumnSchema::new("id", ColumnType::Integer).primary_key()],
        )])
    }

    #[test]
    fn a_minimal_config_is_valid() {
        assert!(sqlite_config().validate().is_ok());
    }

    #[test]
    fn empty_connection_string_is_rejected() {
        let config = DatabaseConfig::new(Engine::Sqlite, "  ");
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn pool_bounds_are_checked() {
        let mut pool = PoolSettings::default();
        pool.min_connections = 5;
        pool.max_connections = 2;
        assert!(sqlite_config().with_pool(pool).validate().is_err());

        let mut pool = PoolSettings::default();
        pool.max_connections = 0;
        pool.min_connections = 0;
        assert!(sqlite_config().with_pool(pool).validate().is_err());
    }

    #[test]
    fn unknown_default_table_is_rejected() {
        let mut config = sqlite_config();
        config.default_table = Some("orders".to_string());
        assert!(config.validate().is_err());
        config.default_table = Some("users".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn duplicate_migration_versions_are_rejected() {
        let config = sqlite_config().with_migrations(vec![
            Migration::new(1, "a", Vec::new()),
            Migration::new(1, "b", Vec::new()),
        ]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn invalid_schema_surfaces_as_a_schema_error() {
        let config = DatabaseConfig::new(Engine::Sqlite, "sqlite::memory:")
            .with_tables(vec![TableSchema::new("empty", Vec::new())]);
        assert!(matches!(config.validate(), Err(ConfigError::Schema(_))));
    }
}
