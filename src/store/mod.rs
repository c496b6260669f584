/// Binary group container.
///
/// ```text
///   Table (partitions)
///        │ codec::encode_table     one Parquet row group per partition,
///        ▼                         categorical columns as Int32 codes
///   ┌──────────────┐
///   │ payload bytes │
///   └──────────────┘
///        │ Container::put_group    rewrite file, groups in sorted order
///        ▼
///   MAGIC | payloads… | index JSON | len | MAGIC
/// ```
pub mod codec;
pub mod container;
pub mod index;
