mod common;

use common::{pool_settings, sqlite_url, users};
use configuration::MigrationSettings;
use core_types::{
    ColumnSchema, ColumnType, ConflictPolicy, Engine, Migration, MigrationStep, MigrationVersion,
};
use database::{ConnectionPool, MigrationError, MigrationManager, Statement, adapter_for};
use sqlx::Row;
use tempfile::TempDir;

async fn pool(dir: &TempDir) -> ConnectionPool {
    ConnectionPool::create(adapter_for(Engine::Sqlite), &sqlite_url(dir.path()), pool_settings(2))
        .await
        .unwrap()
}

fn manager(track_applied: bool) -> MigrationManager {
    let settings = MigrationSettings {
        track_applied,
        ..MigrationSettings::default()
    };
    MigrationManager::new(adapter_for(Engine::Sqlite), settings)
}

async fn tables(pool: &ConnectionPool) -> Vec<String> {
    let mut conn = pool.acquire().await.unwrap();
    let rows = conn
        .fetch_all(&Statement::new(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        ))
        .await
        .unwrap();
    conn.release().await;
    rows.iter().map(|row| row.try_get::<String, _>("name").unwrap()).collect()
}

fn create_table(version: u64, name: &str) -> Migration {
    Migration::new(
        version,
        format!("create {name}"),
        vec![MigrationStep::Sql {
            sql: format!("CREATE TABLE {name} (id INTEGER PRIMARY KEY)"),
            engine: None,
        }],
    )
}

#[tokio::test]
async fn migrations_run_in_version_order_and_stop_at_the_first_failure() {
    let dir = TempDir::new().unwrap();
    let pool = pool(&dir).await;

    let broken = Migration::new(
        2,
        "broken",
        vec![
            MigrationStep::Sql {
                sql: "CREATE TABLE half_done (id INTEGER)".to_string(),
                engine: None,
            },
            MigrationStep::Sql {
                sql: "CREATE TABLE nope (".to_string(),
                engine: None,
            },
        ],
    );
    let migrations = vec![create_table(3, "third"), create_table(1, "first"), broken];

    let err = manager(true).apply_migrations(&pool, &migrations).await.unwrap_err();
    match err {
        MigrationError::StepFailed { version, step, .. } => {
            assert_eq!(version, MigrationVersion::Number(2));
            assert_eq!(step, 2);
        }
        other => panic!("expected a step failure, got {other}"),
    }

    let live = tables(&pool).await;
    assert!(live.contains(&"first".to_string()));
    // The failed migration's first step was rolled back with it.
    assert!(!live.contains(&"half_done".to_string()));
    assert!(!live.contains(&"third".to_string()));
    assert_eq!(pool.status().active, 0);
    pool.close().await;
}

#[tokio::test]
async fn applied_versions_are_skipped_on_later_runs() {
    let dir = TempDir::new().unwrap();
    let pool = pool(&dir).await;
    let migrations = vec![
        Migration::new(
            1,
            "create users",
            vec![MigrationStep::CreateTable {
                table: users(ConflictPolicy::Error),
            }],
        ),
        Migration::new(
            2,
            "add phone",
            vec![MigrationStep::AddColumn {
                table: "users".to_string(),
                column: ColumnSchema::new("phone", ColumnType::String),
            }],
        ),
    ];

    let first = manager(true).apply_migrations(&pool, &migrations).await.unwrap();
    assert_eq!(first.applied, vec![MigrationVersion::Number(1), MigrationVersion::Number(2)]);
    assert!(first.skipped.is_empty());

    // Re-adding the column would fail, so a second run must skip both.
    let second = manager(true).apply_migrations(&pool, &migrations).await.unwrap();
    assert!(second.applied.is_empty());
    assert_eq!(second.skipped.len(), 2);
    assert!(tables(&pool).await.contains(&"_strata_migrations".to_string()));
    pool.close().await;
}

#[tokio::test]
async fn a_changed_applied_migration_is_refused() {
    let dir = TempDir::new().unwrap();
    let pool = pool(&dir).await;
    manager(true)
        .apply_migrations(&pool, &[create_table(1, "first")])
        .await
        .unwrap();

    let edited = create_table(1, "renamed");
    let err = manager(true).apply_migrations(&pool, &[edited]).await.unwrap_err();
    assert!(
        matches!(&err, MigrationError::ChecksumMismatch { version, .. } if *version == MigrationVersion::Number(1)),
        "{err}"
    );
    pool.close().await;
}

#[tokio::test]
async fn untracked_migrations_rerun_every_time() {
    let dir = TempDir::new().unwrap();
    let pool = pool(&dir).await;
    let idempotent = vec![Migration::new(
        1,
        "create users",
        vec![MigrationStep::CreateTable {
            table: users(ConflictPolicy::Error),
        }],
    )];

    let first = manager(false).apply_migrations(&pool, &idempotent).await.unwrap();
    let second = manager(false).apply_migrations(&pool, &idempotent).await.unwrap();
    assert_eq!(first.applied, second.applied);
    assert!(!tables(&pool).await.contains(&"_strata_migrations".to_string()));

    let err = manager(false)
        .apply_migrations(&pool, &[create_table(2, "users")])
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::StepFailed { .. }));
    pool.close().await;
}

#[tokio::test]
async fn steps_for_other_engines_are_not_run() {
    let dir = TempDir::new().unwrap();
    let pool = pool(&dir).await;
    let migration = Migration::new(
        1,
        "postgres only",
        vec![
            MigrationStep::Sql {
                sql: "CREATE EXTENSION IF NOT EXISTS pgcrypto".to_string(),
                engine: Some(Engine::Postgresql),
            },
            MigrationStep::Sql {
                sql: "CREATE TABLE portable (id INTEGER)".to_string(),
                engine: Some(Engine::Sqlite),
            },
        ],
    );
    let report = manager(true).apply_migrations(&pool, &[migration]).await.unwrap();
    assert_eq!(report.applied, vec![MigrationVersion::Number(1)]);
    assert!(tables(&pool).await.contains(&"portable".to_string()));
    pool.close().await;
}
