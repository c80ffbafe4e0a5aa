//! The storage collaborator: the one query shape loaders send to storage.

mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::identity::Scalar;

pub use memory::MemoryRowSource;

/// Storage-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The storage backend could not be reached.
    #[error("storage unavailable: {message}")]
    Unavailable { message: String },

    /// The query referenced a table the backend doesn't know.
    #[error("unknown table: {table}")]
    UnknownTable { table: String },

    /// A row is missing a column, or the column has an unexpected type.
    #[error("column {column}: expected {expected}, found {found}")]
    Column {
        column: String,
        expected: &'static str,
        found: String,
    },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// "Rows of `table` whose `key_column` is one of `keys`, and whose filter
/// columns equal the given values." A `Null` filter matches a null or missing
/// column.
///
/// With a [`Join`], each row is paired with every matching row of the joined
/// table, whose columns are added as `"{table}.{column}"`. The key column and
/// the filters may name those qualified columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowQuery {
    pub table: &'static str,
    pub key_column: &'static str,
    pub keys: Vec<Scalar>,
    pub filters: Vec<(&'static str, Scalar)>,
    pub join: Option<Join>,
}

/// Inner join of a query's table against a relationship table, on
/// `table.column = references`. Null references match nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub table: &'static str,
    pub column: &'static str,
    pub references: &'static str,
}

impl Join {
    /// The name a joined column has in the result rows.
    pub fn qualified(&self, column: &str) -> String {
        format!("{}.{}", self.table, column)
    }
}

impl RowQuery {
    pub fn new(
        table: &'static str,
        key_column: &'static str,
        keys: impl IntoIterator<Item = impl Into<Scalar>>,
    ) -> Self {
        Self {
            table,
            key_column,
            keys: keys.into_iter().map(Into::into).collect(),
            filters: Vec::new(),
            join: None,
        }
    }

    pub fn join(mut self, table: &'static str, column: &'static str, references: &'static str) -> Self {
        self.join = Some(Join {
            table,
            column,
            references,
        });
        self
    }

    pub fn filter(mut self, column: &'static str, value: impl Into<Scalar>) -> Self {
        self.filters.push((column, value.into()));
        self
    }
}

/// A raw row: column name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: BTreeMap<String, Scalar>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    /// This row extended with the columns of `other`, qualified by `join`.
    pub(crate) fn joined(&self, join: &Join, other: &Row) -> Row {
        let mut row = self.clone();
        for (column, value) in &other.columns {
            row.columns.insert(join.qualified(column), value.clone());
        }
        row
    }

    /// The value of a column; missing columns read as `Null`.
    pub fn get(&self, column: &str) -> &Scalar {
        const NULL: &Scalar = &Scalar::Null;
        self.columns.get(column).unwrap_or(NULL)
    }

    pub fn int(&self, column: &str) -> StorageResult<i64> {
        match self.get(column) {
            Scalar::Int(value) => Ok(*value),
            other => Err(column_error(column, "integer", other)),
        }
    }

    pub fn opt_int(&self, column: &str) -> StorageResult<Option<i64>> {
        match self.get(column) {
            Scalar::Null => Ok(None),
            Scalar::Int(value) => Ok(Some(*value)),
            other => Err(column_error(column, "integer or null", other)),
        }
    }

    pub fn text(&self, column: &str) -> StorageResult<&str> {
        match self.get(column) {
            Scalar::Text(value) => Ok(value),
            other => Err(column_error(column, "text", other)),
        }
    }
}

fn column_error(column: &str, expected: &'static str, found: &Scalar) -> StorageError {
    StorageError::Column {
        column: column.to_owned(),
        expected,
        found: found.to_string(),
    }
}

/// Executes a [`RowQuery`] in a single round-trip.
#[async_trait]
pub trait RowSource: Send + Sync + 'static {
    async fn fetch_rows(&self, query: RowQuery) -> StorageResult<Vec<Row>>;
}
