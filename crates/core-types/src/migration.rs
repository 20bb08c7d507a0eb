use crate::enums::Engine;
use crate::schema::{ColumnSchema, TableSchema};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A migration version: an integer or an ordinal label such as `"2024_05_01_users"`.
///
/// Versions order numerically among integers and lexicographically among
/// labels; every integer version sorts before every label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MigrationVersion {
    Number(u64),
    Label(String),
}

impl fmt::Display for MigrationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationVersion::Number(n) => write!(f, "{n}"),
            MigrationVersion::Label(label) => f.write_str(label),
        }
    }
}

impl From<u64> for MigrationVersion {
    fn from(value: u64) -> Self {
        MigrationVersion::Number(value)
    }
}

impl From<&str> for MigrationVersion {
    fn from(value: &str) -> Self {
        MigrationVersion::Label(value.to_string())
    }
}

/// One schema-altering operation. Adapters render each step into engine SQL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MigrationStep {
    CreateTable {
        table: TableSchema,
    },
    DropTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: ColumnSchema,
    },
    DropColumn {
        table: String,
        column: String,
    },
    CreateIndex {
        table: String,
        name: String,
        columns: Vec<String>,
        #[serde(default)]
        unique: bool,
    },
    DropIndex {
        table: String,
        name: String,
    },
    /// Raw SQL, optionally restricted to a single engine.
    Sql {
        sql: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        engine: Option<Engine>,
    },
}

/// A versioned, ordered unit of schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    pub version: MigrationVersion,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<MigrationStep>,
}

impl Migration {
    pub fn new(
        version: impl Into<MigrationVersion>,
        description: impl Into<String>,
        steps: Vec<MigrationStep>,
    ) -> Self {
        Self {
            version: version.into(),
            description: description.into(),
            steps,
        }
    }
}
