use crate::adapters::{DatabaseAdapter, Statement, adapter_for};
use crate::connection::ManagedConnection;
use crate::error::{DbError, SetupError};
use crate::migrations::{MigrationManager, MigrationReport};
use crate::pool::ConnectionPool;
use crate::schema::SchemaValidator;
use crate::values::decode_row;
use analytics::{OperationKind, PerformanceMonitor, PerformanceReport};
use configuration::{Config, ConfigError, DatabaseConfig, MonitorSettings};
use core_types::{
    ColumnSchema, FieldError, FieldErrorKind, PoolStatus, QueryParams, Record, SchemaDefinition,
    TableSchema, ValidationResult,
};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// The public operation surface over one configured database.
///
/// A Store is constructed from a validated [`DatabaseConfig`], then made usable
/// by a single successful [`setup`](Self::setup). Every operation validates
/// its input before touching the pool, runs writes inside a transaction and
/// reports its timing to the [`PerformanceMonitor`].
pub struct Store {
    config: DatabaseConfig,
    adapter: Arc<dyn DatabaseAdapter>,
    schema: SchemaDefinition,
    validator: SchemaValidator,
    migrations: MigrationManager,
    monitor: Arc<PerformanceMonitor>,
    pool: OnceLock<ConnectionPool>,
    setup_lock: tokio::sync::Mutex<Option<MigrationReport>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("engine", &self.config.engine)
            .field("tables", &self.schema.table_names().collect::<Vec<_>>())
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl Store {
    /// Builds a Store with default monitor settings.
    pub fn new(config: DatabaseConfig) -> Result<Self, ConfigError> {
        Self::with_monitor(config, MonitorSettings::default())
    }

    /// Builds a Store from a fully loaded application configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::with_monitor(config.database.clone(), config.monitor.clone())
    }

    pub fn with_monitor(config: DatabaseConfig, monitor: MonitorSettings) -> Result<Self, ConfigError> {
        config.validate()?;
        let monitor = Arc::new(
            PerformanceMonitor::new(monitor)
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?,
        );
        let adapter = adapter_for(config.engine);
        let schema = config.schema_definition();
        let validator = SchemaValidator::new(
            adapter.clone(),
            schema.clone(),
            config.validation.cache_ttl(),
        )
        .with_monitor(monitor.clone());
        let migrations =
            MigrationManager::new(adapter.clone(), config.migrations.clone()).with_monitor(monitor.clone());

        Ok(Self {
            config,
            adapter,
            schema,
            validator,
            migrations,
            monitor,
            pool: OnceLock::new(),
            setup_lock: tokio::sync::Mutex::new(None),
        })
    }

    /// Creates the pool, applies migrations and checks the live schema.
    ///
    /// Each failure names its phase. On failure the pool is closed again and
    /// the Store stays unusable; operations keep returning `DbError::NotReady`.
    pub async fn setup(&self) -> Result<MigrationReport, SetupError> {
        let mut last_report = self.setup_lock.lock().await;
        if self.pool.get().is_some() {
            return Err(SetupError::AlreadySetUp);
        }

        let started = Instant::now();
        tracing::info!(engine = %self.config.engine, tables = self.schema.tables.len(), "Setting up store.");

        let pool = ConnectionPool::create(
            self.adapter.clone(),
            &self.config.connection_string,
            self.config.pool.clone(),
        )
        .await?;

        let report = match self.prepare(&pool).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Store setup failed.");
                pool.close().await;
                return Err(e);
            }
        };

        if let Err(pool) = self.pool.set(pool) {
            pool.close().await;
            return Err(SetupError::AlreadySetUp);
        }
        *last_report = Some(report.clone());
        tracing::info!(
            duration_ms = started.elapsed().as_secs_f64() * 1_000.0,
            "Store is ready."
        );
        Ok(report)
    }

    async fn prepare(&self, pool: &ConnectionPool) -> Result<MigrationReport, SetupError> {
        let report = self
            .migrations
            .apply_migrations(pool, &self.config.schema.migrations)
            .await?;

        self.validator.invalidate_cache();
        let result = self
            .validator
            .validate_database_schema(pool, &self.schema)
            .await
            .map_err(SetupError::Introspection)?;
        if !result.is_valid() {
            return Err(SetupError::Schema(result));
        }
        Ok(report)
    }

    /// True once `setup` has succeeded and until `shutdown`.
    pub fn is_ready(&self) -> bool {
        self.pool.get().is_some_and(|pool| !pool.is_closed())
    }

    fn ready_pool(&self) -> Result<&ConnectionPool, DbError> {
        match self.pool.get() {
            Some(pool) if !pool.is_closed() => Ok(pool),
            _ => Err(DbError::NotReady),
        }
    }

    /// The table a `store` call targets: the one named, else the configured
    /// default, else the only declared table.
    fn resolve_table<'a>(&'a self, table: Option<&'a str>) -> Result<&'a str, DbError> {
        if let Some(table) = table.or(self.config.default_table.as_deref()) {
            return Ok(table);
        }
        match self.schema.tables.as_slice() {
            [only] => Ok(&only.name),
            _ => Err(DbError::Validation(ValidationResult::from_errors(vec![
                FieldError::new(
                    "",
                    "",
                    FieldErrorKind::MissingTable,
                    "no table given and no default table configured",
                ),
            ]))),
        }
    }

    fn declared_table(&self, name: &str) -> Result<&TableSchema, DbError> {
        self.schema.table(name).ok_or_else(|| {
            DbError::Validation(ValidationResult::from_errors(vec![FieldError::new(
                name,
                "",
                FieldErrorKind::MissingTable,
                "table is not declared in the schema",
            )]))
        })
    }

    /// Validates `record` and inserts it in its own transaction.
    ///
    /// An invalid record is rejected before any connection is acquired.
    /// Returns the number of affected rows.
    pub async fn store_with_validation(&self, record: &Record, table: Option<&str>) -> Result<u64, DbError> {
        let table_name = self.resolve_table(table)?;
        let validation = self.validator.validate_record(record, table_name);
        if !validation.is_valid() {
            tracing::debug!(table = table_name, errors = %validation, "Record rejected.");
            return Err(DbError::Validation(validation));
        }
        let pool = self.ready_pool()?;
        let table = self.declared_table(table_name)?;

        let statement = self.adapter.generate_insert(table, record);
        let started = Instant::now();
        let outcome = self
            .execute_in_transaction(pool, std::slice::from_ref(&statement), "store")
            .await;
        self.record_outcome(OperationKind::Store, &statement.sql, started, &outcome, |n| *n);
        outcome
    }

    /// Validates every record, then inserts them all in one transaction.
    ///
    /// Any invalid record rejects the whole batch before I/O; any failed
    /// insert rolls the whole batch back.
    pub async fn store_batch(&self, records: &[Record], table: Option<&str>) -> Result<u64, DbError> {
        let table_name = self.resolve_table(table)?;
        let mut validation = ValidationResult::valid();
        for (index, record) in records.iter().enumerate() {
            for error in self.validator.validate_record(record, table_name).errors() {
                validation.push(FieldError::new(
                    &error.table,
                    &error.field,
                    error.kind,
                    format!("record {index}: {}", error.message),
                ));
            }
        }
        if !validation.is_valid() {
            tracing::debug!(table = table_name, errors = %validation, "Batch rejected.");
            return Err(DbError::Validation(validation));
        }
        if records.is_empty() {
            return Ok(0);
        }
        let pool = self.ready_pool()?;
        let table = self.declared_table(table_name)?;

        let statements: Vec<Statement> = records
            .iter()
            .map(|record| self.adapter.generate_insert(table, record))
            .collect();
        let started = Instant::now();
        let outcome = self.execute_in_transaction(pool, &statements, "store batch").await;
        let pattern = statements.first().map(|s| s.sql.as_str()).unwrap_or_default();
        self.record_outcome(OperationKind::StoreBatch, pattern, started, &outcome, |n| *n);
        outcome
    }

    /// Validates `params`, reads the matching rows and decodes them by
    /// declared column type.
    ///
    /// Full-width rows are checked against the schema afterwards; mismatches
    /// are logged, not returned, since stored data may predate a schema change.
    pub async fn retrieve_with_validation(&self, params: &QueryParams) -> Result<Vec<Record>, DbError> {
        let validation = self.validator.validate_query_parameters(params);
        if !validation.is_valid() {
            tracing::debug!(table = %params.table, errors = %validation, "Query rejected.");
            return Err(DbError::Validation(validation));
        }
        let pool = self.ready_pool()?;
        let table = self.declared_table(&params.table)?;

        let statement = self.adapter.generate_select(table, params);
        let started = Instant::now();
        let outcome = self.fetch(pool, table, params, &statement).await;
        self.record_outcome(OperationKind::Retrieve, &statement.sql, started, &outcome, |rows| {
            rows.len() as u64
        });
        let records = outcome?;

        if params.columns.is_none() {
            for record in &records {
                let check = self.validator.validate_record(record, &table.name);
                if !check.is_valid() {
                    tracing::warn!(table = %table.name, errors = %check, "Stored row does not match the declared schema.");
                }
            }
        }
        Ok(records)
    }

    async fn fetch(
        &self,
        pool: &ConnectionPool,
        table: &TableSchema,
        params: &QueryParams,
        statement: &Statement,
    ) -> Result<Vec<Record>, DbError> {
        let mut conn = pool.acquire().await?;
        let rows = conn.fetch_all(statement).await;
        conn.release().await;
        let rows = rows.map_err(DbError::execution("retrieve"))?;

        let projection: Vec<&ColumnSchema> = match &params.columns {
            Some(names) => names.iter().filter_map(|n| table.column(n)).collect(),
            None => table.columns.iter().collect(),
        };
        rows.iter()
            .map(|row| decode_row(row, &table.name, &projection))
            .collect()
    }

    async fn execute_in_transaction(
        &self,
        pool: &ConnectionPool,
        statements: &[Statement],
        operation: &'static str,
    ) -> Result<u64, DbError> {
        let mut conn = pool.acquire().await?;
        let outcome = run_in_transaction(&mut conn, statements)
            .await
            .map_err(DbError::execution(operation));
        conn.release().await;
        outcome
    }

    fn record_outcome<T>(
        &self,
        operation: OperationKind,
        sql: &str,
        started: Instant,
        outcome: &Result<T, DbError>,
        size: impl FnOnce(&T) -> u64,
    ) {
        match outcome {
            Ok(value) => self
                .monitor
                .record_operation(operation, Some(sql), started.elapsed(), size(value)),
            Err(e) => self
                .monitor
                .record_failed_operation(operation, Some(sql), started.elapsed(), &e.to_string()),
        }
    }

    /// Re-checks the live schema, served from the validator's cache when fresh.
    pub async fn validate_schema(&self) -> Result<ValidationResult, DbError> {
        let pool = self.ready_pool()?;
        self.validator.validate_database_schema(pool, &self.schema).await
    }

    pub fn get_pool_status(&self) -> Result<PoolStatus, DbError> {
        self.ready_pool().map(ConnectionPool::status)
    }

    /// A performance snapshot, including pool recommendations once set up.
    pub fn get_performance_report(&self) -> PerformanceReport {
        self.monitor.report(self.pool.get().map(ConnectionPool::status))
    }

    /// The migration report of the successful setup, if any.
    pub async fn migration_report(&self) -> Option<MigrationReport> {
        self.setup_lock.lock().await.clone()
    }

    /// Closes the pool. The Store is not usable afterwards.
    pub async fn shutdown(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn schema(&self) -> &SchemaDefinition {
        &self.schema
    }

    pub fn adapter(&self) -> &Arc<dyn DatabaseAdapter> {
        &self.adapter
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn validator(&self) -> &SchemaValidator {
        &self.validator
    }

    /// The pool, once setup has created it.
    pub fn pool(&self) -> Option<&ConnectionPool> {
        self.pool.get()
    }
}

/// Runs `statements` in one transaction: all commit or, on the first
/// failure, all roll back before the error is returned.
async fn run_in_transaction(conn: &mut ManagedConnection, statements: &[Statement]) -> Result<u64, sqlx::Error> {
    let mut tx = conn.transaction().await?;
    let mut affected = 0;
    for statement in statements {
        match tx.execute(statement).await {
            Ok(rows) => affected += rows,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed; the connection will be discarded.");
                }
                return Err(e);
            }
        }
    }
    tx.commit().await?;
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::tests::users;
    use core_types::Engine;
    use serde_json::json;

    fn store() -> Store {
        let config = DatabaseConfig::new(Engine::Sqlite, "sqlite::memory:").with_tables(vec![users()]);
        Store::new(config).unwrap()
    }

    #[test]
    fn invalid_configurations_never_produce_a_store() {
        let config = DatabaseConfig::new(Engine::Sqlite, "");
        assert!(Store::new(config).is_err());
    }

    #[test]
    fn the_sole_table_is_the_default() {
        let store = store();
        assert_eq!(store.resolve_table(None).unwrap(), "users");
        assert_eq!(store.resolve_table(Some("other")).unwrap(), "other");
    }

    #[tokio::test]
    async fn operations_before_setup_are_not_ready() {
        let store = store();
        assert!(!store.is_ready());
        let record = crate::adapters::tests::record(json!({"id": 1, "name": "Ada"}));
        assert!(matches!(
            store.store_with_validation(&record, None).await,
            Err(DbError::NotReady)
        ));
        assert!(matches!(store.get_pool_status(), Err(DbError::NotReady)));
        assert!(store.get_performance_report().pool.is_none());
    }

    #[tokio::test]
    async fn validation_runs_before_readiness() {
        let store = store();
        let record = crate::adapters::tests::record(json!({"id": 2, "name": "Bob", "phone": "555"}));
        let err = store.store_with_validation(&record, None).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn an_empty_batch_is_a_no_op() {
        assert_eq!(store().store_batch(&[], None).await.unwrap(), 0);
    }
}
