use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A row as seen by callers: column name to JSON value.
pub type Record = Map<String, Value>;

/// Parameters of a `retrieve` call.
///
/// `filter` matches columns by equality; a `null` filter value matches
/// `IS NULL`. `columns` narrows the projection, defaulting to every declared
/// column of the table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    pub table: String,
    #[serde(default)]
    pub filter: Record,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(default)]
    pub descending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl QueryParams {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(column.into(), value.into());
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(column.into());
        self.descending = descending;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Every column name the query refers to, in filter, projection, order order.
    pub fn referenced_columns(&self) -> impl Iterator<Item = &str> {
        self.filter
            .keys()
            .map(String::as_str)
            .chain(self.columns.iter().flatten().map(String::as_str))
            .chain(self.order_by.as_deref())
    }
}
