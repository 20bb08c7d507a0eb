//! Schema validation: live database against the declared schema, and
//! candidate records and query parameters against declared columns.

use crate::adapters::{DatabaseAdapter, Statement};
use crate::error::DbError;
use crate::pool::ConnectionPool;
use analytics::{OperationKind, PerformanceMonitor};
use core_types::{
    ColumnType, FieldError, FieldErrorKind, QueryParams, Record, SchemaDefinition,
    ValidationResult,
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::Row;
use sqlx::any::AnyRow;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Live columns by lower-cased table name, then lower-cased column name.
type LiveSchema = HashMap<String, HashMap<String, String>>;

struct CachedResult {
    checked_at: Instant,
    result: ValidationResult,
}

/// Validates data against one declared [`SchemaDefinition`].
///
/// Live-schema comparisons are cached per validator, keyed by a hash of the
/// expected schema, for `cache_ttl`.
pub struct SchemaValidator {
    adapter: Arc<dyn DatabaseAdapter>,
    schema: SchemaDefinition,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, CachedResult>>,
    monitor: Option<Arc<PerformanceMonitor>>,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("engine", &self.adapter.engine())
            .field("tables", &self.schema.tables.len())
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

impl SchemaValidator {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>, schema: SchemaDefinition, cache_ttl: Duration) -> Self {
        Self {
            adapter,
            schema,
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
            monitor: None,
        }
    }

    /// Feeds cache hits and misses, and introspection timings, to `monitor`.
    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn schema(&self) -> &SchemaDefinition {
        &self.schema
    }

    /// Compares the live database reachable through `pool` with `expected`.
    ///
    /// Reports missing tables, missing columns and columns whose live type is
    /// not one the adapter accepts for the declared generic type. Extra live
    /// tables and columns are ignored. Read-only.
    pub async fn validate_database_schema(
        &self,
        pool: &ConnectionPool,
        expected: &SchemaDefinition,
    ) -> Result<ValidationResult, DbError> {
        let key = schema_hash(expected);
        if let Some(result) = self.cached(&key) {
            if let Some(monitor) = &self.monitor {
                monitor.record_cache_hit();
            }
            tracing::debug!(key = %key, "Schema validation served from cache.");
            return Ok(result);
        }
        if let Some(monitor) = &self.monitor {
            monitor.record_cache_miss();
        }

        let started = Instant::now();
        let live = match self.introspect(pool).await {
            Ok(live) => live,
            Err(e) => {
                if let Some(monitor) = &self.monitor {
                    monitor.record_failed_operation(
                        OperationKind::SchemaValidation,
                        Some(self.adapter.introspection_query()),
                        started.elapsed(),
                        &e.to_string(),
                    );
                }
                return Err(e);
            }
        };
        let result = self.diff(expected, &live);
        if let Some(monitor) = &self.monitor {
            monitor.record_operation(
                OperationKind::SchemaValidation,
                Some(self.adapter.introspection_query()),
                started.elapsed(),
                live.len() as u64,
            );
        }

        if result.is_valid() {
            tracing::info!(tables = expected.tables.len(), "Live schema matches the declared schema.");
        } else {
            tracing::warn!(errors = result.errors().len(), "Live schema differs from the declared schema: {result}");
        }

        self.lock_cache().insert(
            key,
            CachedResult {
                checked_at: Instant::now(),
                result: result.clone(),
            },
        );
        Ok(result)
    }

    /// Drops every cached live-schema comparison.
    pub fn invalidate_cache(&self) {
        self.lock_cache().clear();
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedResult>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cached(&self, key: &str) -> Option<ValidationResult> {
        let mut cache = self.lock_cache();
        match cache.get(key) {
            Some(entry) if entry.checked_at.elapsed() < self.cache_ttl => Some(entry.result.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    async fn introspect(&self, pool: &ConnectionPool) -> Result<LiveSchema, DbError> {
        let mut conn = pool.acquire().await?;
        let rows = conn
            .fetch_all(&Statement::new(self.adapter.introspection_query()))
            .await;
        conn.release().await;
        let rows = rows.map_err(DbError::execution("introspect schema"))?;

        let mut live = LiveSchema::new();
        for row in &rows {
            let (Some(table), Some(column), data_type) = (
                text(row, "table_name")?,
                text(row, "column_name")?,
                text(row, "data_type")?,
            ) else {
                continue;
            };
            live.entry(table.to_ascii_lowercase())
                .or_default()
                .insert(column.to_ascii_lowercase(), data_type.unwrap_or_default());
        }
        Ok(live)
    }

    fn diff(&self, expected: &SchemaDefinition, live: &LiveSchema) -> ValidationResult {
        let mut result = ValidationResult::valid();
        for table in &expected.tables {
            let Some(columns) = live.get(&table.name.to_ascii_lowercase()) else {
                result.push(FieldError::new(
                    &table.name,
                    "",
                    FieldErrorKind::MissingTable,
                    "table does not exist in the database",
                ));
                continue;
            };
            for column in &table.columns {
                match columns.get(&column.name.to_ascii_lowercase()) {
                    None => result.push(FieldError::new(
                        &table.name,
                        &column.name,
                        FieldErrorKind::MissingColumn,
                        "column does not exist in the database",
                    )),
                    Some(live_type) if !self.adapter.type_matches(column.column_type, live_type) => {
                        result.push(FieldError::new(
                            &table.name,
                            &column.name,
                            FieldErrorKind::TypeMismatch,
                            format!(
                                "declared as {} ({}) but the database reports '{live_type}'",
                                column.column_type,
                                self.adapter.map_type(column.column_type)
                            ),
                        ));
                    }
                    Some(_) => {}
                }
            }
        }
        result
    }

    /// Checks one record against the declared columns of `table_name`.
    ///
    /// The record is valid only when every check passes: each required column
    /// is present, no `null` lands in a non-nullable column, every value fits
    /// its column type and no field is undeclared.
    pub fn validate_record(&self, record: &Record, table_name: &str) -> ValidationResult {
        let Some(table) = self.schema.table(table_name) else {
            return missing_table(table_name);
        };

        let mut result = ValidationResult::valid();
        for column in &table.columns {
            match record.get(&column.name) {
                None if column.is_required() => result.push(FieldError::new(
                    &table.name,
                    &column.name,
                    FieldErrorKind::Required,
                    "a value is required",
                )),
                None => {}
                Some(Value::Null) if !column.accepts_null() => result.push(FieldError::new(
                    &table.name,
                    &column.name,
                    FieldErrorKind::NullNotAllowed,
                    "null is not allowed",
                )),
                Some(Value::Null) => {}
                Some(value) => {
                    if let Err(reason) = column.column_type.check_value(value) {
                        result.push(FieldError::new(
                            &table.name,
                            &column.name,
                            value_error_kind(column.column_type, value),
                            reason,
                        ));
                    }
                }
            }
        }
        for field in record.keys() {
            if table.column(field).is_none() {
                result.push(FieldError::new(
                    &table.name,
                    field,
                    FieldErrorKind::UnknownField,
                    "field is not a declared column",
                ));
            }
        }
        result
    }

    /// Checks that a query names a declared table and only declared columns,
    /// and that its filter values fit their columns.
    pub fn validate_query_parameters(&self, params: &QueryParams) -> ValidationResult {
        let Some(table) = self.schema.table(&params.table) else {
            return missing_table(&params.table);
        };

        let mut result = ValidationResult::valid();
        let mut reported = HashSet::new();
        for name in params.referenced_columns() {
            if table.column(name).is_none() && reported.insert(name) {
                result.push(FieldError::new(
                    &table.name,
                    name,
                    FieldErrorKind::UnknownField,
                    "not a declared column",
                ));
            }
        }
        for (name, value) in &params.filter {
            let Some(column) = table.column(name) else { continue };
            if value.is_null() {
                continue;
            }
            if let Err(reason) = column.column_type.check_value(value) {
                result.push(FieldError::new(
                    &table.name,
                    name,
                    FieldErrorKind::TypeMismatch,
                    format!("filter value does not fit the column: {reason}"),
                ));
            }
        }
        if params.limit == Some(0) {
            result.push(FieldError::new(
                &table.name,
                "limit",
                FieldErrorKind::InvalidValue,
                "limit must be at least 1",
            ));
        }
        if params.columns.as_ref().is_some_and(Vec::is_empty) {
            result.push(FieldError::new(
                &table.name,
                "columns",
                FieldErrorKind::InvalidValue,
                "an explicit projection must name at least one column",
            ));
        }
        result
    }
}

fn missing_table(table: &str) -> ValidationResult {
    ValidationResult::from_errors(vec![FieldError::new(
        table,
        "",
        FieldErrorKind::MissingTable,
        "table is not declared in the schema",
    )])
}

/// `TypeMismatch` when the JSON kind is wrong for the column, `InvalidValue`
/// when the kind is right but the value is not (out of range, unparsable).
fn value_error_kind(column_type: ColumnType, value: &Value) -> FieldErrorKind {
    let kind_fits = match column_type {
        ColumnType::Integer | ColumnType::Bigint | ColumnType::Float | ColumnType::Double => {
            value.is_number()
        }
        ColumnType::Decimal => value.is_number() || value.is_string(),
        ColumnType::Boolean => value.is_boolean(),
        ColumnType::Json => true,
        ColumnType::String
        | ColumnType::Text
        | ColumnType::Datetime
        | ColumnType::Date
        | ColumnType::Time
        | ColumnType::Uuid => value.is_string(),
    };
    if kind_fits {
        FieldErrorKind::InvalidValue
    } else {
        FieldErrorKind::TypeMismatch
    }
}

fn text(row: &AnyRow, column: &str) -> Result<Option<String>, DbError> {
    row.try_get::<Option<String>, _>(column)
        .map_err(DbError::execution("introspect schema"))
}

/// Hex SHA-256 of the schema's canonical JSON form.
pub(crate) fn schema_hash(schema: &SchemaDefinition) -> String {
    let serialized = serde_json::to_vec(schema).unwrap_or_default();
    hex::encode(Sha256::digest(&serialized))
}
