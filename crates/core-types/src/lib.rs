//! # Strata Core Types
//!
//! The shared vocabulary of the Store: engines, generic column types, declared
//! schemas, migrations, records, query parameters, validation results and pool
//! status snapshots.
//!
//! This crate performs no I/O. Everything that talks to a database lives in the
//! `database` crate; everything here is plain data with a few pure checks.

pub mod enums;
pub mod error;
pub mod migration;
pub mod query;
pub mod schema;
pub mod status;
pub mod validation;

// Re-export the core types to provide a clean public API.
pub use enums::{ColumnType, ConflictPolicy, Engine, MAX_STRING_LENGTH};
pub use error::CoreError;
pub use migration::{Migration, MigrationStep, MigrationVersion};
pub use query::{QueryParams, Record};
pub use schema::{ColumnSchema, SchemaDefinition, TableSchema};
pub use status::PoolStatus;
pub use validation::{FieldError, FieldErrorKind, ValidationResult};
