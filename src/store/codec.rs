use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, AsArray, DictionaryArray, StringArray};
use arrow::compute::concat_batches;
use arrow::datatypes::Int32Type;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use log::debug;
use parquet::arrow::arrow_reader::{
    ArrowReaderMetadata, ArrowReaderOptions, ParquetRecordBatchReaderBuilder,
};
use parquet::arrow::{ArrowWriter, ProjectionMask};
use parquet::file::properties::WriterProperties;
use rayon::prelude::*;

use super::index::GroupEntry;
use crate::data::encode::shared_categories;
use crate::data::model::{ColumnMeta, Encoding, Table, TableSchema};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Encode: Table -> payload
// ---------------------------------------------------------------------------

/// A serialized group, ready for `Container::put_group`.
#[derive(Debug)]
pub struct EncodedGroup {
    pub payload: Vec<u8>,
    pub entry: GroupEntry,
}

/// Serialize a table as a Parquet payload with one row group per non-empty
/// partition.
///
/// Text is written without Parquet dictionary pages so the plain layout is
/// really plain. Categorical columns are written as their Int32 codes; their
/// shared dictionary goes into the group entry.
pub fn encode_table(table: &Table) -> Result<EncodedGroup> {
    let schema = table.schema();
    let mut categories = BTreeMap::new();
    for meta in schema.columns() {
        if meta.encoding == Encoding::Categorical {
            let values = shared_categories(table, &meta.name)?.unwrap_or_default();
            categories.insert(meta.name.clone(), values);
        }
    }

    let storage_schema = schema.storage_schema();
    let largest = table
        .partitions()
        .iter()
        .map(RecordBatch::num_rows)
        .max()
        .unwrap_or(0);
    let props = WriterProperties::builder()
        .set_dictionary_enabled(false)
        .set_max_row_group_size(largest.max(1))
        .build();

    let mut writer = ArrowWriter::try_new(Vec::new(), storage_schema.clone(), Some(props))?;
    let mut partitions = Vec::with_capacity(table.num_partitions());
    for batch in table.partitions() {
        if batch.num_rows() == 0 {
            continue;
        }
        let stored = to_storage(batch, schema, &storage_schema)?;
        writer.write(&stored)?;
        writer.flush()?;
        partitions.push(batch.num_rows() as u64);
    }
    let payload = writer.into_inner()?;
    debug!(
        "encoded {} partition(s), {} rows into {} bytes",
        partitions.len(),
        table.num_rows(),
        payload.len()
    );

    Ok(EncodedGroup {
        payload,
        entry: GroupEntry {
            offset: 0,
            length: 0,
            columns: schema.columns().to_vec(),
            partitions,
            categories,
        },
    })
}

fn to_storage(
    batch: &RecordBatch,
    schema: &TableSchema,
    storage_schema: &arrow::datatypes::SchemaRef,
) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = schema
        .columns()
        .iter()
        .zip(batch.columns())
        .map(|(meta, col)| match meta.encoding {
            Encoding::Plain => col.clone(),
            Encoding::Categorical => {
                let dict = col.as_dictionary::<Int32Type>();
                Arc::new(dict.keys().clone()) as ArrayRef
            }
        })
        .collect();
    Ok(RecordBatch::try_new(storage_schema.clone(), columns)?)
}

// ---------------------------------------------------------------------------
// Decode: payload -> partitions
// ---------------------------------------------------------------------------

/// Read the stored partitions of a group, keeping only `projection` (column
/// indices into the group schema, in the order given).
///
/// Row groups are decoded in parallel and returned in stored order. A
/// payload that disagrees with `entry` is reported as a corrupt `container`.
pub fn decode_partitions(
    container: &Path,
    payload: Bytes,
    entry: &GroupEntry,
    projection: &[usize],
) -> Result<(TableSchema, Vec<RecordBatch>)> {
    let full = entry.schema();
    let projected = full.project(projection)?;
    let arrow_schema = projected.arrow_schema();

    let mut sorted = projection.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let stored_schema = full.project(&sorted)?.storage_schema();

    let metadata = ArrowReaderMetadata::load(&payload, ArrowReaderOptions::new())?;
    let num_row_groups = metadata.metadata().num_row_groups();
    if num_row_groups != entry.partitions.len() {
        return Err(Error::corrupt(
            container,
            format!(
                "payload has {num_row_groups} row groups, index lists {} partitions",
                entry.partitions.len()
            ),
        ));
    }

    let dictionaries: Vec<Option<ArrayRef>> = projected
        .columns()
        .iter()
        .map(|meta| dictionary_values(meta, entry))
        .collect();

    let batches = (0..num_row_groups)
        .into_par_iter()
        .map(|rg| -> Result<RecordBatch> {
            let builder =
                ParquetRecordBatchReaderBuilder::new_with_metadata(payload.clone(), metadata.clone());
            let mask = ProjectionMask::roots(builder.parquet_schema(), sorted.iter().copied());
            let reader = builder
                .with_row_groups(vec![rg])
                .with_projection(mask)
                .with_batch_size(entry.partitions[rg].max(1) as usize)
                .build()?;

            let mut chunks = reader.collect::<std::result::Result<Vec<_>, _>>()?;
            let stored = match chunks.pop() {
                Some(only) if chunks.is_empty() => only,
                last => {
                    chunks.extend(last);
                    concat_batches(&stored_schema, &chunks)?
                }
            };
            for (field, col) in stored_schema.fields().iter().zip(stored.columns()) {
                if col.data_type() != field.data_type() {
                    return Err(Error::corrupt(
                        container,
                        format!(
                            "column '{}' is stored as {}, index says {}",
                            field.name(),
                            col.data_type(),
                            field.data_type()
                        ),
                    ));
                }
            }

            // The reader returns columns in file order; rebuild in projection order.
            let columns = projection
                .iter()
                .zip(&dictionaries)
                .map(|(col, dict)| -> Result<ArrayRef> {
                    let pos = sorted.binary_search(col).unwrap_or_default();
                    let stored_col = stored.column(pos).clone();
                    match dict {
                        None => Ok(stored_col),
                        Some(values) => {
                            // Checked against the storage schema above.
                            let keys = stored_col.as_primitive::<Int32Type>().clone();
                            let dict = DictionaryArray::<Int32Type>::try_new(keys, values.clone())?;
                            Ok(Arc::new(dict))
                        }
                    }
                })
                .collect::<Result<Vec<_>>>()?;

            debug!("decoded row group {rg}: {} rows", stored.num_rows());
            Ok(RecordBatch::try_new(arrow_schema.clone(), columns)?)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((projected, batches))
}

fn dictionary_values(meta: &ColumnMeta, entry: &GroupEntry) -> Option<ArrayRef> {
    (meta.encoding == Encoding::Categorical).then(|| {
        let values = entry
            .categories
            .get(&meta.name)
            .map(|v| StringArray::from_iter_values(v.iter()))
            .unwrap_or_else(|| StringArray::from(Vec::<&str>::new()));
        Arc::new(values) as ArrayRef
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::encode::categorize;
    use crate::data::model::ColumnKind;
    use arrow::array::{Array, Int64Array};
    use arrow::datatypes::Int64Type;

    fn accounts(parts: &[&[(i64, &str, i64)]]) -> Table {
        let schema = TableSchema::new(vec![
            ColumnMeta::new("id", ColumnKind::Integer),
            ColumnMeta::new("names", ColumnKind::Text),
            ColumnMeta::new("amount", ColumnKind::Integer),
        ]);
        let batches = parts
            .iter()
            .map(|rows| {
                RecordBatch::try_new(
                    schema.arrow_schema(),
                    vec![
                        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.0))),
                        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.1))),
                        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.2))),
                    ],
                )
                .unwrap()
            })
            .collect();
        Table::new(schema, batches)
    }

    fn store() -> &'static Path {
        Path::new("accounts.grp")
    }

    fn sample() -> Table {
        accounts(&[
            &[(1, "Bob", 10), (2, "Alice", 20)],
            &[],
            &[(3, "Bob", 30), (4, "Carol", 40), (5, "Alice", 50)],
        ])
    }

    #[test]
    fn plain_round_trip_skips_empty_partitions() {
        let table = sample();
        let encoded = encode_table(&table).unwrap();
        assert_eq!(encoded.entry.partitions, vec![2, 3]);
        assert!(encoded.entry.categories.is_empty());

        let payload = Bytes::from(encoded.payload);
        let (schema, batches) =
            decode_partitions(store(), payload, &encoded.entry, &[0, 1, 2]).unwrap();
        assert_eq!(schema, *table.schema());
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], table.partitions()[0]);
        assert_eq!(batches[1], table.partitions()[2]);
    }

    #[test]
    fn categorical_codes_share_the_indexed_dictionary() {
        let table = categorize(sample(), "names").unwrap();
        let encoded = encode_table(&table).unwrap();
        assert_eq!(
            encoded.entry.categories["names"],
            vec!["Alice".to_string(), "Bob".to_string(), "Carol".to_string()]
        );

        let payload = Bytes::from(encoded.payload);
        let (schema, batches) =
            decode_partitions(store(), payload, &encoded.entry, &[0, 1, 2]).unwrap();
        let reloaded = Table::new(schema, batches);
        assert_eq!(
            reloaded.text_values("names").unwrap(),
            table.text_values("names").unwrap()
        );
        assert!(shared_categories(&reloaded, "names").unwrap().is_some());
    }

    #[test]
    fn projection_reads_only_requested_columns_in_order() {
        let table = categorize(sample(), "names").unwrap();
        let encoded = encode_table(&table).unwrap();
        let payload = Bytes::from(encoded.payload);

        let (schema, batches) =
            decode_partitions(store(), payload, &encoded.entry, &[2, 1]).unwrap();
        assert_eq!(schema.column_names(), vec!["amount", "names"]);
        let amounts: Vec<i64> = batches
            .iter()
            .flat_map(|b| b.column(0).as_primitive::<Int64Type>().values().to_vec())
            .collect();
        assert_eq!(amounts, vec![10, 20, 30, 40, 50]);
        assert_eq!(batches[1].column(1).len(), 3);
    }

    #[test]
    fn index_disagreeing_with_payload_is_corrupt() {
        let encoded = encode_table(&sample()).unwrap();
        let mut entry = encoded.entry;
        entry.columns[1].encoding = Encoding::Categorical;

        let err = decode_partitions(store(), Bytes::from(encoded.payload), &entry, &[1])
            .unwrap_err();
        assert!(matches!(err, Error::CorruptContainer { .. }));

        let mut entry = encode_table(&sample()).unwrap().entry;
        entry.partitions.push(1);
        let payload = Bytes::from(encode_table(&sample()).unwrap().payload);
        assert!(matches!(
            decode_partitions(store(), payload, &entry, &[0]),
            Err(Error::CorruptContainer { .. })
        ));
    }
}
