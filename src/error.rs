use std::path::PathBuf;

use arrow::datatypes::DataType;
use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use thiserror::Error;

/// Errors raised while loading, encoding, storing or aggregating a table.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no input found matching '{pattern}'")]
    NoInputFound { pattern: String },

    #[error("invalid glob pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{}:{line}: column '{column}': {message}", path.display())]
    MalformedRow {
        path: PathBuf,
        line: u64,
        column: String,
        message: String,
    },

    #[error(
        "schema mismatch in {}: expected columns {expected:?}, found {found:?}",
        path.display()
    )]
    SchemaMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("column '{column}' not found")]
    ColumnNotFound { column: String },

    #[error("column '{column}' has type {data_type}, expected {expected}")]
    ColumnType {
        column: String,
        data_type: DataType,
        expected: &'static str,
    },

    #[error("invalid group name '{name}': {reason}")]
    InvalidGroupName { name: String, reason: &'static str },

    #[error("group '{group}' not found in {}", path.display())]
    GroupNotFound { path: PathBuf, group: String },

    #[error(
        "group '{group}' in {} changed after it was scanned: expected columns {expected:?}, found {found:?}",
        path.display()
    )]
    GroupChanged {
        path: PathBuf,
        group: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("{} is not a valid group container: {reason}", path.display())]
    CorruptContainer { path: PathBuf, reason: String },

    #[error("partition {partition} of column '{column}' does not share the table dictionary")]
    InconsistentDictionary { column: String, partition: usize },

    #[error("column '{column}' has {count} distinct values, more than an Int32 code can address")]
    TooManyCategories { column: String, count: usize },

    #[error("sum of column '{column}' overflowed")]
    SumOverflow { column: String },

    #[error(transparent)]
    Arrow(#[from] ArrowError),

    #[error(transparent)]
    Parquet(#[from] ParquetError),

    #[error("container index: {0}")]
    Index(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptContainer {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
