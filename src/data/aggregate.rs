use std::fmt;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::{sum, sum_checked};
use arrow::datatypes::{Float64Type, Int64Type};
use rayon::prelude::*;

use super::model::{ColumnKind, ColumnMeta};
use crate::error::{Error, Result};

/// Sum of a numeric column; integer columns stay exact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnSum {
    Integer(i64),
    Float(f64),
}

impl fmt::Display for ColumnSum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnSum::Integer(v) => write!(f, "{v}"),
            ColumnSum::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Sum one column given as per-partition chunks. Partitions are summed in
/// parallel and combined in partition order, so the result does not depend
/// on scheduling. Nulls are skipped.
pub fn sum_column(meta: &ColumnMeta, chunks: &[ArrayRef]) -> Result<ColumnSum> {
    match meta.kind {
        ColumnKind::Integer => {
            let partials = chunks
                .par_iter()
                .map(|chunk| -> Result<i64> {
                    let values = chunk
                        .as_primitive_opt::<Int64Type>()
                        .ok_or_else(|| chunk_type(meta, chunk))?;
                    sum_checked(values)
                        .map(Option::unwrap_or_default)
                        .map_err(|_| Error::SumOverflow {
                            column: meta.name.clone(),
                        })
                })
                .collect::<Result<Vec<i64>>>()?;

            partials
                .into_iter()
                .try_fold(0i64, i64::checked_add)
                .map(ColumnSum::Integer)
                .ok_or_else(|| Error::SumOverflow {
                    column: meta.name.clone(),
                })
        }
        ColumnKind::Float => {
            let partials = chunks
                .par_iter()
                .map(|chunk| -> Result<f64> {
                    let values = chunk
                        .as_primitive_opt::<Float64Type>()
                        .ok_or_else(|| chunk_type(meta, chunk))?;
                    Ok(sum(values).unwrap_or(0.0))
                })
                .collect::<Result<Vec<f64>>>()?;
            Ok(ColumnSum::Float(partials.into_iter().sum()))
        }
        _ => Err(Error::ColumnType {
            column: meta.name.clone(),
            data_type: meta.data_type(),
            expected: "integer or float",
        }),
    }
}

fn chunk_type(meta: &ColumnMeta, chunk: &ArrayRef) -> Error {
    Error::ColumnType {
        column: meta.name.clone(),
        data_type: chunk.data_type().clone(),
        expected: if meta.kind == ColumnKind::Integer {
            "int64"
        } else {
            "float64"
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use arrow::array::{Float64Array, Int64Array, StringArray};

    #[test]
    fn integer_sum_skips_nulls_across_partitions() {
        let meta = ColumnMeta::new("amount", ColumnKind::Integer);
        let chunks: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(vec![Some(5), None, Some(7)])),
            Arc::new(Int64Array::from(Vec::<i64>::new())),
            Arc::new(Int64Array::from(vec![-2])),
        ];
        assert_eq!(sum_column(&meta, &chunks).unwrap(), ColumnSum::Integer(10));
    }

    #[test]
    fn integer_overflow_is_an_error() {
        let meta = ColumnMeta::new("amount", ColumnKind::Integer);
        let chunks: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(vec![i64::MAX])),
            Arc::new(Int64Array::from(vec![1])),
        ];
        let err = sum_column(&meta, &chunks).unwrap_err();
        assert!(matches!(err, Error::SumOverflow { .. }));
    }

    #[test]
    fn float_sum_and_text_rejection() {
        let meta = ColumnMeta::new("amount", ColumnKind::Float);
        let chunks: Vec<ArrayRef> = vec![Arc::new(Float64Array::from(vec![0.5, 1.25]))];
        assert_eq!(sum_column(&meta, &chunks).unwrap(), ColumnSum::Float(1.75));

        let mismatched: Vec<ArrayRef> = vec![Arc::new(Int64Array::from(vec![1]))];
        assert!(matches!(
            sum_column(&meta, &mismatched),
            Err(Error::ColumnType { .. })
        ));

        let text = ColumnMeta::new("names", ColumnKind::Text);
        let chunks: Vec<ArrayRef> = vec![Arc::new(StringArray::from(vec!["a"]))];
        assert!(matches!(
            sum_column(&text, &chunks),
            Err(Error::ColumnType { .. })
        ));
    }
}
