mod common;

use common::{config_with_tables, products, record, sqlite_url, users};
use configuration::DatabaseConfig;
use core_types::{ConflictPolicy, Engine, FieldErrorKind, Migration, MigrationStep, QueryParams};
use database::{DbError, MigrationError, PoolError, SetupError, Store};
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;

async fn ready_store(dir: &TempDir, policy: ConflictPolicy) -> Store {
    let store = Store::new(config_with_tables(dir.path(), vec![users(policy), products()])).unwrap();
    store.setup().await.unwrap();
    store
}

#[tokio::test]
async fn setup_applies_migrations_and_becomes_ready() {
    let dir = TempDir::new().unwrap();
    let store = Store::new(config_with_tables(dir.path(), vec![users(ConflictPolicy::Error)])).unwrap();
    assert!(!store.is_ready());

    let report = store.setup().await.unwrap();
    assert_eq!(report.applied.len(), 1);
    assert!(store.is_ready());
    assert!(store.validate_schema().await.unwrap().is_valid());

    assert!(matches!(store.setup().await, Err(SetupError::AlreadySetUp)));
    store.shutdown().await;
}

#[tokio::test]
async fn a_stored_record_reads_back_unchanged() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir, ConflictPolicy::Error).await;

    let product = record(json!({
        "id": 1,
        "sku": "67e55044-10b1-426f-9247-bb680e5fe0c8",
        "name": "Desk lamp",
        "price": "19.99",
        "in_stock": true,
        "rating": 4.5,
        "weight": 1.25,
        "quantity": 3,
        "released_on": "2024-03-01",
        "restocked_at": "2024-03-01T12:00:00Z",
        "opens_at": "09:30:00",
        "attrs": {"color": "red", "sizes": [1, 2]},
        "notes": null
    }));
    assert_eq!(store.store_with_validation(&product, Some("products")).await.unwrap(), 1);

    let rows = store
        .retrieve_with_validation(&QueryParams::table("products").filter("id", 1))
        .await
        .unwrap();
    assert_eq!(rows, vec![product]);
    store.shutdown().await;
}

#[tokio::test]
async fn decimals_and_offset_datetimes_read_back_in_canonical_form() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir, ConflictPolicy::Error).await;

    let product = record(json!({
        "id": 2,
        "sku": "9a1f3c52-5b7e-4d0a-8c3e-2f6b1e7d4a90",
        "name": "Chair",
        "price": 2.5,
        "restocked_at": "2024-03-01T14:00:00+02:00"
    }));
    store.store_with_validation(&product, Some("products")).await.unwrap();

    let rows = store
        .retrieve_with_validation(
            &QueryParams::table("products")
                .filter("id", 2)
                .columns(["price", "restocked_at"]),
        )
        .await
        .unwrap();
    assert_eq!(rows[0]["price"], json!("2.5"));
    assert_eq!(rows[0]["restocked_at"], json!("2024-03-01T12:00:00Z"));
    store.shutdown().await;
}

#[tokio::test]
async fn stores_run_from_spawned_tasks() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ready_store(&dir, ConflictPolicy::Error).await);

    let mut tasks = Vec::new();
    for id in 1..=8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let user = record(json!({"id": id, "name": format!("user-{id}")}));
            store.store_with_validation(&user, Some("users")).await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 1);
    }

    let rows = store.retrieve_with_validation(&QueryParams::table("users")).await.unwrap();
    assert_eq!(rows.len(), 8);
    assert_eq!(store.get_pool_status().unwrap().active, 0);
    store.shutdown().await;
}

#[tokio::test]
async fn invalid_records_never_reach_the_pool() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir, ConflictPolicy::Error).await;
    let before = store.get_pool_status().unwrap();

    let with_phone = record(json!({"id": 2, "name": "Bob", "phone": "555"}));
    let err = store.store_with_validation(&with_phone, Some("users")).await.unwrap_err();
    let result = match err {
        DbError::Validation(result) => result,
        other => panic!("expected a validation error, got {other}"),
    };
    assert!(result.has_error(FieldErrorKind::UnknownField, "phone"));

    let without_name = record(json!({"id": 3}));
    let err = store.store_with_validation(&without_name, Some("users")).await.unwrap_err();
    assert!(err.is_validation());

    let bad_query = QueryParams::table("users").filter("phone", "555");
    assert!(store.retrieve_with_validation(&bad_query).await.unwrap_err().is_validation());

    let after = store.get_pool_status().unwrap();
    assert_eq!(before.total_acquired, after.total_acquired);
    assert_eq!(before.total_released, after.total_released);

    let rows = store.retrieve_with_validation(&QueryParams::table("users")).await.unwrap();
    assert!(rows.is_empty());
    store.shutdown().await;
}

#[tokio::test]
async fn duplicate_keys_fail_under_the_error_policy() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir, ConflictPolicy::Error).await;

    let ada = record(json!({"id": 1, "name": "Ada"}));
    store.store_with_validation(&ada, Some("users")).await.unwrap();

    let carol = record(json!({"id": 1, "name": "Carol"}));
    let err = store.store_with_validation(&carol, Some("users")).await.unwrap_err();
    assert!(matches!(err, DbError::Execution { operation: "store", .. }), "{err}");

    let rows = store
        .retrieve_with_validation(&QueryParams::table("users").filter("id", 1))
        .await
        .unwrap();
    assert_eq!(rows[0]["name"], json!("Ada"));
    assert_eq!(rows[0]["email"], Value::Null);

    let status = store.get_pool_status().unwrap();
    assert_eq!(status.active, 0);
    assert_eq!(status.total_acquired, status.total_released);
    store.shutdown().await;
}

#[tokio::test]
async fn duplicate_keys_overwrite_under_the_upsert_policy() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir, ConflictPolicy::Upsert).await;

    store
        .store_with_validation(&record(json!({"id": 1, "name": "Ada", "email": "ada@example.com"})), Some("users"))
        .await
        .unwrap();
    store
        .store_with_validation(&record(json!({"id": 1, "name": "Carol"})), Some("users"))
        .await
        .unwrap();

    let rows = store.retrieve_with_validation(&QueryParams::table("users")).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!("Carol"));
    // Columns the second record omitted keep their stored value.
    assert_eq!(rows[0]["email"], json!("ada@example.com"));
    store.shutdown().await;
}

#[tokio::test]
async fn a_failing_batch_leaves_no_rows_behind() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir, ConflictPolicy::Error).await;

    let batch = vec![
        record(json!({"id": 1, "name": "Ada", "email": "shared@example.com"})),
        record(json!({"id": 2, "name": "Bob", "email": "shared@example.com"})),
    ];
    let err = store.store_batch(&batch, Some("users")).await.unwrap_err();
    assert!(matches!(err, DbError::Execution { .. }), "{err}");
    assert!(store.retrieve_with_validation(&QueryParams::table("users")).await.unwrap().is_empty());

    let good = vec![
        record(json!({"id": 1, "name": "Ada"})),
        record(json!({"id": 2, "name": "Bob"})),
    ];
    assert_eq!(store.store_batch(&good, Some("users")).await.unwrap(), 2);
    store.shutdown().await;
}

#[tokio::test]
async fn one_invalid_record_rejects_the_whole_batch() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir, ConflictPolicy::Error).await;

    let batch = vec![
        record(json!({"id": 1, "name": "Ada"})),
        record(json!({"id": "two", "name": "Bob"})),
    ];
    let DbError::Validation(result) = store.store_batch(&batch, Some("users")).await.unwrap_err() else {
        panic!("expected a validation error");
    };
    assert!(result.errors()[0].message.starts_with("record 1:"));
    assert!(store.retrieve_with_validation(&QueryParams::table("users")).await.unwrap().is_empty());
    store.shutdown().await;
}

#[tokio::test]
async fn retrieval_filters_orders_limits_and_projects() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir, ConflictPolicy::Error).await;
    let people = vec![
        record(json!({"id": 1, "name": "Ada", "email": "ada@example.com"})),
        record(json!({"id": 2, "name": "Bob"})),
        record(json!({"id": 3, "name": "Cy"})),
    ];
    store.store_batch(&people, Some("users")).await.unwrap();

    let no_email = store
        .retrieve_with_validation(
            &QueryParams::table("users")
                .filter("email", Value::Null)
                .order_by("id", true)
                .limit(1),
        )
        .await
        .unwrap();
    assert_eq!(no_email, vec![record(json!({"id": 3, "name": "Cy", "email": null}))]);

    let names = store
        .retrieve_with_validation(&QueryParams::table("users").columns(["name"]).order_by("name", false))
        .await
        .unwrap();
    let names: Vec<&Value> = names.iter().map(|r| &r["name"]).collect();
    assert_eq!(names, vec![&json!("Ada"), &json!("Bob"), &json!("Cy")]);
    store.shutdown().await;
}

#[tokio::test]
async fn operations_are_recorded_by_the_monitor() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir, ConflictPolicy::Error).await;
    store
        .store_with_validation(&record(json!({"id": 1, "name": "Ada"})), Some("users"))
        .await
        .unwrap();
    let _ = store
        .store_with_validation(&record(json!({"id": 1, "name": "Ada"})), Some("users"))
        .await;
    store.retrieve_with_validation(&QueryParams::table("users")).await.unwrap();

    let report = store.get_performance_report();
    assert!(report.failed_operations >= 1);
    assert!(report.total_operations >= 3);
    assert!(report.pool.is_some());
    assert!((0.0..=100.0).contains(&report.health.score));
    store.shutdown().await;
}

#[tokio::test]
async fn a_missing_table_fails_setup_in_the_schema_phase() {
    let dir = TempDir::new().unwrap();
    let config = DatabaseConfig::new(Engine::Sqlite, sqlite_url(dir.path()))
        .with_tables(vec![users(ConflictPolicy::Error)]);
    let store = Store::new(config).unwrap();

    let Err(SetupError::Schema(result)) = store.setup().await else {
        panic!("expected a schema failure");
    };
    assert!(result.has_error(FieldErrorKind::MissingTable, ""));
    assert!(!store.is_ready());
    assert!(matches!(
        store.retrieve_with_validation(&QueryParams::table("users")).await,
        Err(DbError::NotReady)
    ));
}

#[tokio::test]
async fn a_broken_migration_fails_setup_in_the_migration_phase() {
    let dir = TempDir::new().unwrap();
    let config = config_with_tables(dir.path(), vec![users(ConflictPolicy::Error)]).with_migrations(vec![
        Migration::new(
            1,
            "broken",
            vec![MigrationStep::Sql {
                sql: "CREATE TABLE users (".to_string(),
                engine: None,
            }],
        ),
    ]);
    let store = Store::new(config).unwrap();

    let err = store.setup().await.unwrap_err();
    assert!(
        matches!(&err, SetupError::Migration(MigrationError::StepFailed { step: 1, .. })),
        "{err}"
    );
    assert!(!store.is_ready());
}

#[tokio::test]
async fn an_unreachable_database_fails_setup_in_the_pool_phase() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("no-such-dir");
    let config = config_with_tables(&missing, vec![users(ConflictPolicy::Error)]);
    let store = Store::new(config).unwrap();

    let err = store.setup().await.unwrap_err();
    assert!(
        matches!(&err, SetupError::Pool(PoolError::Initialization { engine: Engine::Sqlite, .. })),
        "{err}"
    );
}

#[tokio::test]
async fn shutdown_makes_the_store_unusable() {
    let dir = TempDir::new().unwrap();
    let store = ready_store(&dir, ConflictPolicy::Error).await;
    store.shutdown().await;

    assert!(!store.is_ready());
    let err = store
        .store_with_validation(&record(json!({"id": 1, "name": "Ada"})), Some("users"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotReady));
}
