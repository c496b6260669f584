use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use csv::StringRecord;
use log::debug;

use super::model::{ColumnKind, ColumnMeta, TableSchema};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// How delimited text input is parsed.
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: u8,
    /// Records of the first file sampled for type inference.
    pub infer_rows: usize,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            infer_rows: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// CsvSource – a set of CSV files with one shared schema
// ---------------------------------------------------------------------------

/// Files matched by a glob, one partition per file. Building a source reads
/// only headers plus the inference sample; rows are parsed per partition.
#[derive(Debug, Clone)]
pub struct CsvSource {
    pattern: String,
    files: Vec<PathBuf>,
    schema: TableSchema,
    options: CsvOptions,
}

impl CsvSource {
    /// Discover files matching `pattern` and infer their schema.
    pub fn discover(pattern: &str, options: &CsvOptions) -> Result<Self> {
        let files = expand_glob(pattern)?;
        debug!("'{pattern}' matched {} file(s)", files.len());

        let headers = read_headers(&files[0], options)?;
        for path in &files[1..] {
            let found = read_headers(path, options)?;
            if found != headers {
                return Err(Error::SchemaMismatch {
                    path: path.clone(),
                    expected: headers,
                    found,
                });
            }
        }

        let kinds = infer_kinds(&files[0], headers.len(), options)?;
        let columns = headers
            .into_iter()
            .zip(kinds)
            .map(|(name, kind)| ColumnMeta::new(name, kind))
            .collect();

        Ok(Self {
            pattern: pattern.to_string(),
            files,
            schema: TableSchema::new(columns),
            options: options.clone(),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn num_partitions(&self) -> usize {
        self.files.len()
    }

    /// Parse one file into a batch holding only the `projection` columns.
    pub fn read_partition(&self, index: usize, projection: &[usize]) -> Result<RecordBatch> {
        let path = &self.files[index];
        let mut reader = open_reader(path, &self.options)?;

        let projected = self.schema.project(projection)?;
        let metas = projected.columns();
        let mut builders: Vec<ColumnBuilder> =
            metas.iter().map(|m| ColumnBuilder::new(m.kind)).collect();

        let mut record = StringRecord::new();
        let mut rows = 0usize;
        loop {
            let more = reader.read_record(&mut record).map_err(|source| Error::Csv {
                path: path.clone(),
                source,
            })?;
            if !more {
                break;
            }
            for ((builder, &col), meta) in builders.iter_mut().zip(projection).zip(metas) {
                let field = record.get(col).unwrap_or("");
                builder.append(field).map_err(|message| Error::MalformedRow {
                    path: path.clone(),
                    line: record.position().map_or(0, |p| p.line()),
                    column: meta.name.clone(),
                    message,
                })?;
            }
            rows += 1;
        }
        debug!("parsed {rows} rows from {}", path.display());

        let columns: Vec<ArrayRef> = builders.into_iter().map(ColumnBuilder::finish).collect();
        let schema = projected.arrow_schema();
        let options = RecordBatchOptions::new().with_row_count(Some(rows));
        Ok(RecordBatch::try_new_with_options(schema, columns, &options)?)
    }

    /// Count data rows in one file without building any arrays.
    pub fn count_partition_rows(&self, index: usize) -> Result<u64> {
        let path = &self.files[index];
        let mut reader = open_reader(path, &self.options)?;
        let mut record = csv::ByteRecord::new();
        let mut rows = 0u64;
        while reader
            .read_byte_record(&mut record)
            .map_err(|source| Error::Csv {
                path: path.clone(),
                source,
            })?
        {
            rows += 1;
        }
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Discovery and inference
// ---------------------------------------------------------------------------

/// Expand a glob into the sorted list of regular files it matches.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob::glob(pattern).map_err(|source| Error::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(err) => debug!("skipping unreadable glob entry: {err}"),
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(Error::NoInputFound {
            pattern: pattern.to_string(),
        });
    }
    Ok(files)
}

fn open_reader(path: &Path, options: &CsvOptions) -> Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(true)
        .from_path(path)
        .map_err(|source| Error::Csv {
            path: path.to_path_buf(),
            source,
        })
}

fn read_headers(path: &Path, options: &CsvOptions) -> Result<Vec<String>> {
    let mut reader = open_reader(path, options)?;
    let headers = reader.headers().map_err(|source| Error::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(headers.iter().map(|h| h.trim().to_string()).collect())
}

/// Narrowest type seen so far for one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Candidate {
    Unknown,
    Integer,
    Float,
    Boolean,
    Text,
}

impl Candidate {
    fn observe(self, field: &str) -> Candidate {
        if field.is_empty() {
            return self;
        }
        let seen = guess_kind(field);
        match (self, seen) {
            (Candidate::Unknown, seen) => seen,
            (a, b) if a == b => a,
            (Candidate::Integer, Candidate::Float) | (Candidate::Float, Candidate::Integer) => {
                Candidate::Float
            }
            _ => Candidate::Text,
        }
    }

    fn kind(self) -> ColumnKind {
        match self {
            Candidate::Integer => ColumnKind::Integer,
            Candidate::Float => ColumnKind::Float,
            Candidate::Boolean => ColumnKind::Boolean,
            Candidate::Unknown | Candidate::Text => ColumnKind::Text,
        }
    }
}

fn guess_kind(s: &str) -> Candidate {
    let s = s.trim();
    if s.parse::<i64>().is_ok() {
        return Candidate::Integer;
    }
    if s.parse::<f64>().is_ok() {
        return Candidate::Float;
    }
    if s == "true" || s == "false" {
        return Candidate::Boolean;
    }
    Candidate::Text
}

fn infer_kinds(path: &Path, width: usize, options: &CsvOptions) -> Result<Vec<ColumnKind>> {
    let mut reader = open_reader(path, options)?;
    let mut candidates = vec![Candidate::Unknown; width];

    for result in reader.records().take(options.infer_rows) {
        let record = result.map_err(|source| Error::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        for (candidate, field) in candidates.iter_mut().zip(record.iter()) {
            *candidate = candidate.observe(field);
        }
    }

    Ok(candidates.into_iter().map(Candidate::kind).collect())
}

// ---------------------------------------------------------------------------
// Column builders
// ---------------------------------------------------------------------------

enum ColumnBuilder {
    Integer(Int64Builder),
    Float(Float64Builder),
    Boolean(BooleanBuilder),
    Text(StringBuilder),
}

impl ColumnBuilder {
    fn new(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Integer => ColumnBuilder::Integer(Int64Builder::new()),
            ColumnKind::Float => ColumnBuilder::Float(Float64Builder::new()),
            ColumnKind::Boolean => ColumnBuilder::Boolean(BooleanBuilder::new()),
            ColumnKind::Text => ColumnBuilder::Text(StringBuilder::new()),
        }
    }

    /// Append one field; empty fields become nulls.
    fn append(&mut self, field: &str) -> std::result::Result<(), String> {
        if field.is_empty() {
            match self {
                ColumnBuilder::Integer(b) => b.append_null(),
                ColumnBuilder::Float(b) => b.append_null(),
                ColumnBuilder::Boolean(b) => b.append_null(),
                ColumnBuilder::Text(b) => b.append_null(),
            }
            return Ok(());
        }

        match self {
            ColumnBuilder::Integer(b) => {
                let v = field
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| format!("'{field}' is not an integer"))?;
                b.append_value(v);
            }
            ColumnBuilder::Float(b) => {
                let v = field
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| format!("'{field}' is not a number"))?;
                b.append_value(v);
            }
            ColumnBuilder::Boolean(b) => match field.trim() {
                "true" => b.append_value(true),
                "false" => b.append_value(false),
                _ => return Err(format!("'{field}' is not a boolean")),
            },
            ColumnBuilder::Text(b) => b.append_value(field),
        }
        Ok(())
    }

    fn finish(self) -> ArrayRef {
        match self {
            ColumnBuilder::Integer(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Float(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Boolean(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Text(mut b) => Arc::new(b.finish()),
        }
    }
}
