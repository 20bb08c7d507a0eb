//! Ordered, transactional migrations.
//!
//! Migrations run strictly in ascending version order, each inside its own
//! transaction, and the run stops at the first failure. With tracking enabled
//! (the default) every applied version is recorded in a tracking table in the
//! same transaction as its steps, so later runs skip it; a recorded version
//! whose steps have since changed is refused.
//!
//! MySQL commits DDL implicitly, so there a failing migration can leave its
//! earlier steps applied. The run still stops and the version is not recorded.

use crate::adapters::DatabaseAdapter;
use crate::connection::ManagedConnection;
use crate::error::MigrationError;
use crate::pool::ConnectionPool;
use crate::values::decode_row;
use analytics::{OperationKind, PerformanceMonitor};
use chrono::{SecondsFormat, Utc};
use configuration::MigrationSettings;
use core_types::{
    ColumnSchema, ColumnType, Migration, MigrationVersion, QueryParams, Record, TableSchema,
};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// What one `apply_migrations` call did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationReport {
    /// Versions applied by this run, in the order they ran.
    pub applied: Vec<MigrationVersion>,
    /// Versions already recorded in the tracking table.
    pub skipped: Vec<MigrationVersion>,
    pub duration_ms: f64,
}

pub struct MigrationManager {
    adapter: Arc<dyn DatabaseAdapter>,
    settings: MigrationSettings,
    monitor: Option<Arc<PerformanceMonitor>>,
}

impl std::fmt::Debug for MigrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationManager")
            .field("engine", &self.adapter.engine())
            .field("settings", &self.settings)
            .finish()
    }
}

impl MigrationManager {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>, settings: MigrationSettings) -> Self {
        Self {
            adapter,
            settings,
            monitor: None,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Hex SHA-256 of a migration's steps. The description is not part of it.
    pub fn checksum(migration: &Migration) -> String {
        let serialized = serde_json::to_vec(&migration.steps).unwrap_or_default();
        hex::encode(Sha256::digest(&serialized))
    }

    /// The tracking table as a declared table, so every engine renders it
    /// through the same DDL and DML paths as user tables.
    fn tracking_table(&self) -> TableSchema {
        TableSchema::new(
            self.settings.table_name.clone(),
            vec![
                ColumnSchema::new("version", ColumnType::String).primary_key(),
                ColumnSchema::new("description", ColumnType::Text).not_null(),
                ColumnSchema::new("checksum", ColumnType::String).not_null(),
                ColumnSchema::new("applied_at", ColumnType::String).not_null(),
            ],
        )
    }

    /// Applies `migrations` through one pooled connection in ascending
    /// version order, stopping at the first failure.
    pub async fn apply_migrations(
        &self,
        pool: &ConnectionPool,
        migrations: &[Migration],
    ) -> Result<MigrationReport, MigrationError> {
        let started = Instant::now();
        let mut ordered: Vec<&Migration> = migrations.iter().collect();
        ordered.sort_by(|a, b| a.version.cmp(&b.version));

        let mut conn = pool.acquire().await?;
        let outcome = self.apply_ordered(&mut conn, &ordered).await;
        conn.release().await;

        let mut report = outcome?;
        report.duration_ms = started.elapsed().as_secs_f64() * 1_000.0;
        tracing::info!(
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            duration_ms = report.duration_ms,
            "Migrations complete."
        );
        Ok(report)
    }

    async fn apply_ordered(
        &self,
        conn: &mut ManagedConnection,
        ordered: &[&Migration],
    ) -> Result<MigrationReport, MigrationError> {
        let recorded = if self.settings.track_applied {
            self.load_recorded(conn).await?
        } else {
            HashMap::new()
        };

        let mut report = MigrationReport::default();
        for migration in ordered {
            let checksum = Self::checksum(migration);
            if let Some(applied) = recorded.get(&migration.version.to_string()) {
                if *applied != checksum {
                    return Err(MigrationError::ChecksumMismatch {
                        version: migration.version.clone(),
                        applied: applied.clone(),
                        declared: checksum,
                    });
                }
                tracing::debug!(version = %migration.version, "Migration already applied; skipping.");
                report.skipped.push(migration.version.clone());
                continue;
            }

            let started = Instant::now();
            match self.apply_one(conn, migration, &checksum).await {
                Ok(()) => {
                    tracing::info!(
                        version = %migration.version,
                        description = %migration.description,
                        "Applied migration."
                    );
                    if let Some(monitor) = &self.monitor {
                        monitor.record_operation(
                            OperationKind::Migration,
                            None,
                            started.elapsed(),
                            migration.steps.len() as u64,
                        );
                    }
                    report.applied.push(migration.version.clone());
                }
                Err(e) => {
                    tracing::error!(version = %migration.version, error = %e, "Migration failed.");
                    if let Some(monitor) = &self.monitor {
                        monitor.record_failed_operation(
                            OperationKind::Migration,
                            None,
                            started.elapsed(),
                            &e.to_string(),
                        );
                    }
                    return Err(e);
                }
            }
        }
        Ok(report)
    }

    /// Creates the tracking table if needed and returns recorded checksums by version.
    async fn load_recorded(
        &self,
        conn: &mut ManagedConnection,
    ) -> Result<HashMap<String, String>, MigrationError> {
        let table = self.tracking_table();
        conn.execute_raw(&self.adapter.generate_create_table(&table))
            .await
            .map_err(MigrationError::Tracking)?;

        let select = self
            .adapter
            .generate_select(&table, &QueryParams::table(&table.name));
        let rows = conn.fetch_all(&select).await.map_err(MigrationError::Tracking)?;

        let columns: Vec<&ColumnSchema> = table.columns.iter().collect();
        let mut recorded = HashMap::with_capacity(rows.len());
        for row in &rows {
            let record = decode_row(row, &table.name, &columns)
                .map_err(|e| MigrationError::Tracking(sqlx::Error::Decode(e.into())))?;
            if let (Some(Value::String(version)), Some(Value::String(checksum))) =
                (record.get("version"), record.get("checksum"))
            {
                recorded.insert(version.clone(), checksum.clone());
            }
        }
        Ok(recorded)
    }

    async fn apply_one(
        &self,
        conn: &mut ManagedConnection,
        migration: &Migration,
        checksum: &str,
    ) -> Result<(), MigrationError> {
        let mut tx = conn
            .transaction()
            .await
            .map_err(|source| MigrationError::Transaction {
                version: migration.version.clone(),
                source,
            })?;

        for (index, step) in migration.steps.iter().enumerate() {
            let Some(sql) = self.adapter.render_step(step) else {
                tracing::debug!(version = %migration.version, step = index + 1, "Step targets another engine; skipped.");
                continue;
            };
            if let Err(source) = tx.execute_raw(&sql).await {
                if let Err(e) = tx.rollback().await {
                    tracing::warn!(error = %e, "Rollback after a failed migration step also failed.");
                }
                return Err(MigrationError::StepFailed {
                    version: migration.version.clone(),
                    description: migration.description.clone(),
                    step: index + 1,
                    source,
                });
            }
        }

        if self.settings.track_applied {
            let mut row = Record::new();
            row.insert("version".to_string(), Value::String(migration.version.to_string()));
            row.insert("description".to_string(), Value::String(migration.description.clone()));
            row.insert("checksum".to_string(), Value::String(checksum.to_string()));
            row.insert(
                "applied_at".to_string(),
                Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
            let insert = self.adapter.generate_insert(&self.tracking_table(), &row);
            if let Err(source) = tx.execute(&insert).await {
                if let Err(e) = tx.rollback().await {
                    tracing::warn!(error = %e, "Rollback after a failed tracking insert also failed.");
                }
                return Err(MigrationError::Tracking(source));
            }
        }

        tx.commit().await.map_err(|source| MigrationError::Transaction {
            version: migration.version.clone(),
            source,
        })
    }
}
