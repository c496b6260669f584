/// Data layer: core types, loading, encoding and aggregation.
///
/// Architecture:
/// ```text
///   accounts.*.csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  glob → CsvSource, one partition per file
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  model    │  Table: TableSchema + Vec<RecordBatch>
///   └──────────┘
///        │
///        ├──► encode     text → shared dictionary + Int32 codes
///        └──► aggregate  per-partition sums, combined in order
/// ```

pub mod aggregate;
pub mod encode;
pub mod loader;
pub mod model;
pub mod sample;
