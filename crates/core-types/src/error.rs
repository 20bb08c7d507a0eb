use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unsupported database engine '{0}' (expected postgresql, mysql or sqlite)")]
    UnknownEngine(String),

    #[error("Unknown column type '{0}'")]
    UnknownColumnType(String),

    #[error("Invalid schema definition: {0}")]
    InvalidSchema(String),
}
