//! # Strata Database Crate
//!
//! Multi-backend persistence for a Store: PostgreSQL, MySQL and SQLite behind
//! one adapter interface, with a bounded connection pool, guarded
//! transactions, schema enforcement and ordered migrations.
//!
//! ## Architectural Principles
//!
//! - **One adapter, chosen once:** Every engine-specific decision lives in a
//!   `DatabaseAdapter`. The Store picks one from the configured engine and
//!   never branches on the engine again.
//! - **Validate before I/O:** Records and query parameters are checked against
//!   the declared schema before a connection is acquired, so invalid input
//!   never reaches the database.
//! - **Exactly one outcome per transaction:** A `TransactionScope` ends in a
//!   commit or a rollback, and its connection always returns to the pool.
//! - **Bounded and observable:** The pool never lends more than
//!   `max_connections` at once, and every operation reports its timing to the
//!   `PerformanceMonitor`.
//!
//! ## Public API
//!
//! - `Store`: `setup`, `store_with_validation`, `store_batch`,
//!   `retrieve_with_validation`, `get_pool_status`, `get_performance_report`.
//! - `ConnectionPool` / `ManagedConnection` / `TransactionScope`: the pooled
//!   connection layer, usable directly.
//! - `SchemaValidator` and `MigrationManager`: the setup-time building blocks.
//! - `DbError`, `PoolError`, `MigrationError`, `SetupError`: the specific error
//!   types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod adapters;
pub mod connection;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod schema;
pub mod store;
pub mod values;

// Re-export the key components to create a clean, public-facing API.
pub use adapters::{
    DatabaseAdapter, MysqlAdapter, PostgresAdapter, SqliteAdapter, Statement, adapter_for,
};
pub use connection::{ManagedConnection, TransactionScope};
pub use error::{DbError, MigrationError, PoolError, SetupError};
pub use migrations::{MigrationManager, MigrationReport};
pub use pool::ConnectionPool;
pub use schema::SchemaValidator;
pub use store::Store;
pub use values::SqlValue;
