use core_types::{Engine, MigrationVersion, ValidationResult};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the connection pool.
///
/// `AcquireTimeout`, `Connect` and `Closed` are per-operation connectivity
/// errors; callers may retry them. `Initialization` and `EngineInit` only
/// occur while the pool is being created and are fatal to setup.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Could not reach the {engine} database: {source}")]
    Initialization {
        engine: Engine,
        #[source]
        source: sqlx::Error,
    },

    #[error("Engine initialization failed: {0}")]
    EngineInit(#[source] sqlx::Error),

    #[error("Timed out after {waited:?} waiting for a database connection")]
    AcquireTimeout { waited: Duration },

    #[error("Failed to open a database connection: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("The connection pool is closed")]
    Closed,
}

/// Errors raised while applying migrations. Always fatal to setup.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Migration {version} ({description}) failed at step {step}: {source}")]
    StepFailed {
        version: MigrationVersion,
        description: String,
        step: usize,
        #[source]
        source: sqlx::Error,
    },

    #[error(
        "Migration {version} was already applied with checksum {applied} but is now declared with checksum {declared}"
    )]
    ChecksumMismatch {
        version: MigrationVersion,
        applied: String,
        declared: String,
    },

    #[error("Could not open or commit the transaction for migration {version}: {source}")]
    Transaction {
        version: MigrationVersion,
        #[source]
        source: sqlx::Error,
    },

    #[error("Could not read or write the migration tracking table: {0}")]
    Tracking(#[source] sqlx::Error),

    #[error("Could not acquire a connection for migrations: {0}")]
    Pool(#[from] PoolError),
}

/// The phased outcome of `Store::setup`. Each variant names the phase that
/// failed; a Store whose setup failed stays unusable.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Setup failed while creating the connection pool: {0}")]
    Pool(#[source] PoolError),

    #[error("Setup failed while initializing the engine: {0}")]
    Engine(#[source] PoolError),

    #[error("Setup failed while applying migrations: {0}")]
    Migration(#[from] MigrationError),

    #[error("Setup failed: the live schema does not match the declared schema: {0}")]
    Schema(ValidationResult),

    #[error("Setup failed while reading the live schema: {0}")]
    Introspection(#[source] DbError),

    #[error("Setup has already completed for this store")]
    AlreadySetUp,
}

impl From<PoolError> for SetupError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::EngineInit(_) => SetupError::Engine(err),
            other => SetupError::Pool(other),
        }
    }
}

/// Errors returned by Store operations.
#[derive(Error, Debug)]
pub enum DbError {
    /// The caller's input was rejected before any I/O.
    #[error("Validation failed: {0}")]
    Validation(ValidationResult),

    /// The database rejected or failed the operation; any transaction was rolled back.
    #[error("Database operation '{operation}' failed: {source}")]
    Execution {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("A value returned for {table}.{column} could not be decoded: {reason}")]
    Decode {
        table: String,
        column: String,
        reason: String,
    },

    #[error("The store has not completed setup")]
    NotReady,
}

impl DbError {
    pub(crate) fn execution(operation: &'static str) -> impl FnOnce(sqlx::Error) -> DbError {
        move |source| DbError::Execution { operation, source }
    }

    /// True when the caller's input was at fault, as opposed to the database.
    pub fn is_validation(&self) -> bool {
        matches!(self, DbError::Validation(_))
    }
}
