use crate::enums::{ColumnType, ConflictPolicy};
use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

fn default_nullable() -> bool {
    true
}

/// A single declared column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Columns are nullable unless declared otherwise, matching SQL.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, alias = "primaryKey")]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
            primary_key: false,
            unique: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// A primary key column never accepts `NULL`, whatever `nullable` says.
    pub fn accepts_null(&self) -> bool {
        self.nullable && !self.primary_key
    }

    /// Whether a record must carry a value for this column.
    pub fn is_required(&self) -> bool {
        !self.accepts_null() && self.default.is_none()
    }
}

/// A declared table: its name, ordered columns and conflict behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    #[serde(default)]
    pub on_conflict: ConflictPolicy,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSchema>) -> Self {
        Self {
            name: name.into(),
            columns,
            on_conflict: ConflictPolicy::Error,
        }
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.on_conflict = policy;
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.iter().filter(|c| c.primary_key)
    }

    /// Checks the structural rules a table must satisfy before any SQL is generated.
    pub fn check(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidSchema("table name must not be empty".to_string()));
        }
        if self.columns.is_empty() {
            return Err(CoreError::InvalidSchema(format!(
                "table '{}' declares no columns",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.trim().is_empty() {
                return Err(CoreError::InvalidSchema(format!(
                    "table '{}' has a column with an empty name",
                    self.name
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(CoreError::InvalidSchema(format!(
                    "table '{}' declares column '{}' more than once",
                    self.name, column.name
                )));
            }
            if let Some(default) = &column.default
                && !default.is_null()
            {
                column.column_type.check_value(default).map_err(|reason| {
                    CoreError::InvalidSchema(format!(
                        "default of '{}.{}' is invalid: {reason}",
                        self.name, column.name
                    ))
                })?;
            }
        }
        if self.on_conflict == ConflictPolicy::Upsert && self.primary_key_columns().next().is_none() {
            return Err(CoreError::InvalidSchema(format!(
                "table '{}' uses on_conflict = upsert but declares no primary key",
                self.name
            )));
        }
        Ok(())
    }
}

/// The ordered list of tables a Store expects to find in its database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub tables: Vec<TableSchema>,
}

impl SchemaDefinition {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    pub fn check(&self) -> Result<(), CoreError> {
        let mut seen = HashSet::new();
        for table in &self.tables {
            table.check()?;
            if !seen.insert(table.name.as_str()) {
                return Err(CoreError::InvalidSchema(format!(
                    "table '{}' is declared more than once",
                    table.name
                )));
            }
        }
        Ok(())
    }
}
