//! Storage-format benchmark for partitioned tabular data.
//!
//! CSV files are loaded as a lazy, partitioned [`LazyFrame`], written to a
//! single-file group container, reloaded, and a column sum is timed before
//! and after dictionary-encoding a text column.

pub mod bench;
pub mod data;
pub mod error;
pub mod frame;
pub mod store;

pub use bench::{BenchConfig, BenchReport, BenchmarkRunner, TimingSample};
pub use data::aggregate::ColumnSum;
pub use data::loader::CsvOptions;
pub use data::model::{ColumnKind, ColumnMeta, Encoding, Table, TableSchema};
pub use error::{Error, Result};
pub use frame::{GroupSummary, LazyFrame};
pub use store::container::Container;
