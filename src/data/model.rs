use std::fmt;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// ColumnKind / Encoding – logical type of one column
// ---------------------------------------------------------------------------

/// Logical value type of a column, mirroring the dtypes inferred from CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Integer,
    Float,
    Boolean,
    Text,
}

impl ColumnKind {
    /// Arrow type of a plain (non-dictionary) column of this kind.
    pub fn data_type(self) -> DataType {
        match self {
            ColumnKind::Integer => DataType::Int64,
            ColumnKind::Float => DataType::Float64,
            ColumnKind::Boolean => DataType::Boolean,
            ColumnKind::Text => DataType::Utf8,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnKind::Integer | ColumnKind::Float)
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnKind::Integer => "integer",
            ColumnKind::Float => "float",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Text => "text",
        };
        f.write_str(name)
    }
}

/// How a column's values are represented in memory and on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    Plain,
    /// Dictionary of distinct values plus one Int32 code per row.
    Categorical,
}

// ---------------------------------------------------------------------------
// TableSchema – ordered column descriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub kind: ColumnKind,
    #[serde(default)]
    pub encoding: Encoding,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            encoding: Encoding::Plain,
        }
    }

    /// Arrow type as held in memory (categorical text is a dictionary).
    pub fn data_type(&self) -> DataType {
        match self.encoding {
            Encoding::Plain => self.kind.data_type(),
            Encoding::Categorical => {
                DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8))
            }
        }
    }

    /// Arrow type as written to a group payload (categorical text is its codes).
    pub fn storage_type(&self) -> DataType {
        match self.encoding {
            Encoding::Plain => self.kind.data_type(),
            Encoding::Categorical => DataType::Int32,
        }
    }
}

/// Column layout of a table, in source order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSchema {
    columns: Vec<ColumnMeta>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnMeta>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::ColumnNotFound {
                column: name.to_string(),
            })
    }

    pub fn column(&self, name: &str) -> Result<&ColumnMeta> {
        self.index_of(name).map(|i| &self.columns[i])
    }

    pub(crate) fn column_mut(&mut self, name: &str) -> Result<&mut ColumnMeta> {
        let idx = self.index_of(name)?;
        Ok(&mut self.columns[idx])
    }

    /// Subset of columns, in the order given by `indices`.
    pub fn project(&self, indices: &[usize]) -> Result<TableSchema> {
        indices
            .iter()
            .map(|&i| {
                self.columns
                    .get(i)
                    .cloned()
                    .ok_or_else(|| Error::ColumnNotFound {
                        column: format!("#{i}"),
                    })
            })
            .collect::<Result<Vec<_>>>()
            .map(TableSchema::new)
    }

    /// In-memory Arrow schema.
    pub fn arrow_schema(&self) -> SchemaRef {
        self.build_schema(ColumnMeta::data_type)
    }

    /// Arrow schema of the stored payload.
    pub fn storage_schema(&self) -> SchemaRef {
        self.build_schema(ColumnMeta::storage_type)
    }

    fn build_schema(&self, data_type: fn(&ColumnMeta) -> DataType) -> SchemaRef {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(c.name.clone(), data_type(c), true))
            .collect();
        Arc::new(Schema::new(fields))
    }
}

// ---------------------------------------------------------------------------
// Table – a materialized, partitioned dataset
// ---------------------------------------------------------------------------

/// A fully materialized table: one `RecordBatch` per partition, all sharing
/// `schema.arrow_schema()`.
#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    partitions: Vec<RecordBatch>,
}

impl Table {
    pub fn new(schema: TableSchema, partitions: Vec<RecordBatch>) -> Self {
        Table { schema, partitions }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn partitions(&self) -> &[RecordBatch] {
        &self.partitions
    }

    pub fn into_parts(self) -> (TableSchema, Vec<RecordBatch>) {
        (self.schema, self.partitions)
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Total row count across partitions.
    pub fn num_rows(&self) -> usize {
        self.partitions.iter().map(RecordBatch::num_rows).sum()
    }

    /// The named column, one array per partition.
    pub fn column_chunks(&self, name: &str) -> Result<Vec<ArrayRef>> {
        let idx = self.schema.index_of(name)?;
        Ok(self
            .partitions
            .iter()
            .map(|batch| batch.column(idx).clone())
            .collect())
    }

    /// Decoded string values of a text column, in row order. Categorical
    /// columns are expanded back through their dictionary.
    pub fn text_values(&self, name: &str) -> Result<Vec<Option<String>>> {
        let meta = self.schema.column(name)?;
        if meta.kind != ColumnKind::Text {
            return Err(Error::ColumnType {
                column: name.to_string(),
                data_type: meta.data_type(),
                expected: "text",
            });
        }

        let mut out = Vec::with_capacity(self.num_rows());
        for chunk in self.column_chunks(name)? {
            let plain = cast(&chunk, &DataType::Utf8)?;
            let strings = plain.as_string::<i32>();
            out.extend(
                (0..strings.len()).map(|i| (!strings.is_null(i)).then(|| strings.value(i).to_string())),
            );
        }
        Ok(out)
    }

    /// The first `n` rows, as zero-copy slices of the leading partitions.
    pub fn head(&self, n: usize) -> Vec<RecordBatch> {
        let mut remaining = n;
        let mut out = Vec::new();
        for batch in &self.partitions {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(batch.num_rows());
            out.push(batch.slice(0, take));
            remaining -= take;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{DictionaryArray, Int64Array, StringArray};
    use arrow::datatypes::Int32Type;

    fn accounts_schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnMeta::new("id", ColumnKind::Integer),
            ColumnMeta::new("names", ColumnKind::Text),
            ColumnMeta::new("amount", ColumnKind::Integer),
        ])
    }

    #[test]
    fn categorical_column_types() {
        let mut schema = accounts_schema();
        schema.column_mut("names").unwrap().encoding = Encoding::Categorical;

        let arrow = schema.arrow_schema();
        assert!(matches!(
            arrow.field(1).data_type(),
            DataType::Dictionary(k, v) if **k == DataType::Int32 && **v == DataType::Utf8
        ));
        assert_eq!(schema.storage_schema().field(1).data_type(), &DataType::Int32);
        assert_eq!(arrow.field(0).data_type(), &DataType::Int64);
    }

    #[test]
    fn missing_column_is_reported() {
        let err = accounts_schema().index_of("balance").unwrap_err();
        assert!(matches!(err, Error::ColumnNotFound { column } if column == "balance"));
    }

    #[test]
    fn projection_keeps_order_and_rejects_out_of_range() {
        let schema = accounts_schema();
        let projected = schema.project(&[2, 0]).unwrap();
        assert_eq!(projected.column_names(), vec!["amount", "id"]);

        let err = schema.project(&[0, 3]).unwrap_err();
        assert!(matches!(err, Error::ColumnNotFound { column } if column == "#3"));
    }

    #[test]
    fn text_values_decode_dictionary_and_head_spans_partitions() {
        let mut schema = accounts_schema();
        schema.column_mut("names").unwrap().encoding = Encoding::Categorical;
        let values: ArrayRef = Arc::new(StringArray::from(vec!["Alice", "Bob"]));

        let make = |ids: Vec<i64>, codes: Vec<Option<i32>>| {
            let keys = arrow::array::Int32Array::from(codes);
            let names = DictionaryArray::<Int32Type>::try_new(keys, values.clone()).unwrap();
            let n = ids.len();
            RecordBatch::try_new(
                schema.arrow_schema(),
                vec![
                    Arc::new(Int64Array::from(ids)),
                    Arc::new(names),
                    Arc::new(Int64Array::from(vec![1; n])),
                ],
            )
            .unwrap()
        };

        let table = Table::new(
            schema.clone(),
            vec![
                make(vec![1, 2], vec![Some(1), None]),
                make(vec![3], vec![Some(0)]),
            ],
        );

        assert_eq!(table.num_rows(), 3);
        assert_eq!(
            table.text_values("names").unwrap(),
            vec![Some("Bob".to_string()), None, Some("Alice".to_string())]
        );

        let head = table.head(3);
        assert_eq!(head.len(), 2);
        assert_eq!(head[1].num_rows(), 1);
        assert!(table.text_values("id").is_err());
    }
}
