//! Categorical (dictionary) encoding of text columns.
//!
//! Encoding is two passes: the distinct values of every partition are
//! gathered into one sorted dictionary, then each partition's strings are
//! replaced by Int32 codes into that shared dictionary. Every partition of an
//! encoded column therefore holds the same `values` array.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, DictionaryArray, Int32Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Int32Type};
use arrow::record_batch::RecordBatch;
use log::debug;
use rayon::prelude::*;

use super::model::{ColumnKind, Encoding, Table};
use crate::error::{Error, Result};

/// Replace a text column with a dictionary encoding shared by all partitions.
///
/// Categorizing a column that is already categorical returns the table
/// unchanged.
pub fn categorize(table: Table, column: &str) -> Result<Table> {
    let meta = table.schema().column(column)?;
    if meta.kind != ColumnKind::Text {
        return Err(Error::ColumnType {
            column: column.to_string(),
            data_type: meta.data_type(),
            expected: "text",
        });
    }
    if meta.encoding == Encoding::Categorical {
        return Ok(table);
    }

    let idx = table.schema().index_of(column)?;
    let (mut schema, partitions) = table.into_parts();

    let categories = distinct_values(&partitions, idx);
    if categories.len() > i32::MAX as usize {
        return Err(Error::TooManyCategories {
            column: column.to_string(),
            count: categories.len(),
        });
    }
    debug!(
        "column '{column}': {} categories across {} partition(s)",
        categories.len(),
        partitions.len()
    );

    let codes: HashMap<&str, i32> = categories
        .iter()
        .enumerate()
        .map(|(i, v)| (v.as_str(), i as i32))
        .collect();
    let values: ArrayRef = Arc::new(StringArray::from_iter_values(categories.iter()));

    schema.column_mut(column)?.encoding = Encoding::Categorical;
    let arrow_schema = schema.arrow_schema();

    let encoded = partitions
        .par_iter()
        .map(|batch| -> Result<RecordBatch> {
            let strings = batch.column(idx).as_string::<i32>();
            let keys: Int32Array = strings
                .iter()
                .map(|v| v.map(|s| codes[s]))
                .collect();
            let dict = DictionaryArray::<Int32Type>::try_new(keys, values.clone())?;

            let mut columns = batch.columns().to_vec();
            columns[idx] = Arc::new(dict);
            Ok(RecordBatch::try_new(arrow_schema.clone(), columns)?)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Table::new(schema, encoded))
}

/// Expand a categorical column back to plain text.
pub fn decode(table: Table, column: &str) -> Result<Table> {
    let meta = table.schema().column(column)?;
    if meta.encoding != Encoding::Categorical {
        return Ok(table);
    }

    let idx = table.schema().index_of(column)?;
    let (mut schema, partitions) = table.into_parts();
    schema.column_mut(column)?.encoding = Encoding::Plain;
    let arrow_schema = schema.arrow_schema();

    let decoded = partitions
        .iter()
        .map(|batch| -> Result<RecordBatch> {
            let mut columns = batch.columns().to_vec();
            columns[idx] = cast(&columns[idx], &DataType::Utf8)?;
            Ok(RecordBatch::try_new(arrow_schema.clone(), columns)?)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Table::new(schema, decoded))
}

/// The dictionary of a categorical column, checked to be identical in every
/// partition. Returns `None` when the table has no partitions.
pub fn shared_categories(table: &Table, column: &str) -> Result<Option<Vec<String>>> {
    let idx = table.schema().index_of(column)?;
    let mut shared: Option<&ArrayRef> = None;

    for (partition, batch) in table.partitions().iter().enumerate() {
        let dict = batch.column(idx).as_dictionary_opt::<Int32Type>().ok_or_else(|| {
            Error::ColumnType {
                column: column.to_string(),
                data_type: batch.column(idx).data_type().clone(),
                expected: "dictionary(int32, utf8)",
            }
        })?;
        match shared {
            None => shared = Some(dict.values()),
            Some(first) if first.as_ref() == dict.values().as_ref() => {}
            Some(_) => {
                return Err(Error::InconsistentDictionary {
                    column: column.to_string(),
                    partition,
                })
            }
        }
    }

    Ok(shared.map(|values| {
        values
            .as_string::<i32>()
            .iter()
            .map(|v| v.unwrap_or_default().to_string())
            .collect()
    }))
}

fn distinct_values(partitions: &[RecordBatch], idx: usize) -> BTreeSet<String> {
    partitions
        .par_iter()
        .map(|batch| {
            batch
                .column(idx)
                .as_string::<i32>()
                .iter()
                .flatten()
                .map(str::to_string)
                .collect::<BTreeSet<String>>()
        })
        .reduce(BTreeSet::new, |mut a, b| {
            a.extend(b);
            a
        })
}
