//! Lazy tabular handles.
//!
//! A [`LazyFrame`] describes where data comes from and what should happen to
//! it. Building one touches only headers or the container index; rows are
//! read when a result is forced by [`LazyFrame::collect`],
//! [`LazyFrame::sum`], [`LazyFrame::count_rows`] or
//! [`LazyFrame::write_group`].

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info};
use rayon::prelude::*;

use crate::data::aggregate::{sum_column, ColumnSum};
use crate::data::encode;
use crate::data::loader::{CsvOptions, CsvSource};
use crate::data::model::{ColumnKind, Encoding, Table, TableSchema};
use crate::error::{Error, Result};
use crate::store::codec;
use crate::store::container::Container;
use crate::store::index::normalize_group;

#[derive(Debug, Clone)]
enum Source {
    Csv(CsvSource),
    Group {
        container: PathBuf,
        group: String,
        schema: TableSchema,
        partitions: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Categorize(String),
}

/// A deferred plan: a source plus the steps to apply once it is read.
#[derive(Debug, Clone)]
pub struct LazyFrame {
    source: Source,
    /// Schema after all steps.
    schema: TableSchema,
    steps: Vec<Step>,
}

/// What a group write produced.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    pub container: PathBuf,
    pub group: String,
    pub rows: u64,
    pub partitions: usize,
    pub bytes: u64,
}

impl LazyFrame {
    /// Plan a scan over every CSV file matching `pattern`.
    pub fn scan_csv(pattern: &str, options: &CsvOptions) -> Result<Self> {
        let source = CsvSource::discover(pattern, options)?;
        let schema = source.schema().clone();
        Ok(Self {
            source: Source::Csv(source),
            schema,
            steps: Vec::new(),
        })
    }

    /// Plan a scan of one stored group.
    pub fn scan_group(container: impl AsRef<Path>, group: &str) -> Result<Self> {
        let store = Container::open(container.as_ref())?;
        let entry = store.entry(group)?;
        let schema = entry.schema();
        Ok(Self {
            source: Source::Group {
                container: container.as_ref().to_path_buf(),
                group: normalize_group(group)?,
                schema: schema.clone(),
                partitions: entry.partitions.len(),
            },
            schema,
            steps: Vec::new(),
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn num_partitions(&self) -> usize {
        match &self.source {
            Source::Csv(src) => src.num_partitions(),
            Source::Group { partitions, .. } => *partitions,
        }
    }

    /// Defer dictionary-encoding of a text column.
    pub fn categorize(mut self, column: &str) -> Result<Self> {
        let meta = self.schema.column_mut(column)?;
        if meta.kind != ColumnKind::Text {
            return Err(Error::ColumnType {
                column: column.to_string(),
                data_type: meta.data_type(),
                expected: "text",
            });
        }
        if meta.encoding == Encoding::Plain {
            meta.encoding = Encoding::Categorical;
            self.steps.push(Step::Categorize(column.to_string()));
        }
        Ok(self)
    }

    /// Read every partition and apply the pending steps.
    pub fn collect(&self) -> Result<Table> {
        let all: Vec<usize> = (0..self.source_schema().columns().len()).collect();
        let mut table = self.read(&all)?;
        for step in &self.steps {
            match step {
                Step::Categorize(column) => table = encode::categorize(table, column)?,
            }
        }
        Ok(table)
    }

    /// Sum a numeric column. Only that column is materialized.
    pub fn sum(&self, column: &str) -> Result<ColumnSum> {
        let idx = self.schema.index_of(column)?;
        let meta = self.schema.columns()[idx].clone();
        if !meta.kind.is_numeric() {
            return Err(Error::ColumnType {
                column: column.to_string(),
                data_type: meta.data_type(),
                expected: "integer or float",
            });
        }

        let table = self.read(&[idx])?;
        sum_column(&meta, &table.column_chunks(column)?)
    }

    /// Total number of rows.
    pub fn count_rows(&self) -> Result<u64> {
        match &self.source {
            Source::Csv(src) => (0..src.num_partitions())
                .into_par_iter()
                .map(|i| src.count_partition_rows(i))
                .sum(),
            Source::Group {
                container, group, ..
            } => Ok(Container::open(container)?.entry(group)?.num_rows()),
        }
    }

    /// Materialize the plan and store it as `group` in `container`,
    /// replacing any group of the same name.
    pub fn write_group(&self, container: impl AsRef<Path>, group: &str) -> Result<GroupSummary> {
        let container = container.as_ref();
        let group = normalize_group(group)?;
        info!("writing {self} to {}:{group}", container.display());

        let table = self.collect()?;
        let encoded = codec::encode_table(&table)?;
        let summary = GroupSummary {
            container: container.to_path_buf(),
            group: group.clone(),
            rows: encoded.entry.num_rows(),
            partitions: encoded.entry.partitions.len(),
            bytes: encoded.payload.len() as u64,
        };

        let mut store = Container::open_or_empty(container)?;
        store.put_group(&group, encoded.entry, &encoded.payload)?;
        Ok(summary)
    }

    fn source_schema(&self) -> &TableSchema {
        match &self.source {
            Source::Csv(src) => src.schema(),
            Source::Group { schema, .. } => schema,
        }
    }

    /// Read the `projection` columns of the source, before any step.
    fn read(&self, projection: &[usize]) -> Result<Table> {
        match &self.source {
            Source::Csv(src) => {
                let batches = (0..src.num_partitions())
                    .into_par_iter()
                    .map(|i| src.read_partition(i, projection))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Table::new(src.schema().project(projection)?, batches))
            }
            Source::Group {
                container,
                group,
                schema,
                ..
            } => {
                let store = Container::open(container)?;
                let entry = store.entry(group)?;
                // The projection indexes the schema seen at scan time.
                let current = entry.schema();
                if current != *schema {
                    return Err(Error::GroupChanged {
                        path: container.clone(),
                        group: group.clone(),
                        expected: schema.column_names(),
                        found: current.column_names(),
                    });
                }

                let payload = store.read_payload(group)?;
                debug!("read {} payload bytes for {group}", payload.len());
                let (schema, batches) =
                    codec::decode_partitions(container, payload, entry, projection)?;
                Ok(Table::new(schema, batches))
            }
        }
    }
}

impl fmt::Display for LazyFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Source::Csv(src) => write!(
                f,
                "csv '{}' ({} partitions)",
                src.pattern(),
                src.num_partitions()
            )?,
            Source::Group {
                container,
                group,
                partitions,
                ..
            } => write!(
                f,
                "group {}:{group} ({partitions} partitions)",
                container.display()
            )?,
        }
        for step in &self.steps {
            match step {
                Step::Categorize(column) => write!(f, " -> categorize({column})")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::encode::shared_categories;

    fn csv_dir() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("accounts.0.csv"),
            "id,names,amount\n1,Alice,100\n2,Bob,-20\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("accounts.1.csv"),
            "id,names,amount\n3,Alice,5\n",
        )
        .unwrap();
        let pattern = dir.path().join("accounts.*.csv").to_string_lossy().into_owned();
        (dir, pattern)
    }

    #[test]
    fn plan_is_lazy_until_forced() {
        let (dir, pattern) = csv_dir();
        let frame = LazyFrame::scan_csv(&pattern, &CsvOptions::default())
            .unwrap()
            .categorize("names")
            .unwrap();
        assert_eq!(frame.to_string().matches("categorize(names)").count(), 1);

        // Rows are parsed at collect time, so a bad value added now surfaces then.
        std::fs::write(
            dir.path().join("accounts.1.csv"),
            "id,names,amount\n3,Alice,oops\n",
        )
        .unwrap();
        assert!(matches!(frame.collect(), Err(Error::MalformedRow { .. })));
    }

    #[test]
    fn csv_sum_count_and_group_round_trip() {
        let (dir, pattern) = csv_dir();
        let container = dir.path().join("accounts.grp");

        let csv = LazyFrame::scan_csv(&pattern, &CsvOptions::default()).unwrap();
        assert_eq!(csv.sum("amount").unwrap(), ColumnSum::Integer(85));
        assert_eq!(csv.count_rows().unwrap(), 3);

        let raw = csv.write_group(&container, "data").unwrap();
        assert_eq!((raw.group.as_str(), raw.rows, raw.partitions), ("/data", 3, 2));

        let reloaded = LazyFrame::scan_group(&container, "/data").unwrap();
        assert_eq!(reloaded.num_partitions(), 2);
        assert_eq!(reloaded.sum("amount").unwrap(), ColumnSum::Integer(85));

        reloaded
            .clone()
            .categorize("names")
            .unwrap()
            .write_group(&container, "/data2")
            .unwrap();
        let categorical = LazyFrame::scan_group(&container, "/data2").unwrap();
        assert_eq!(
            categorical.schema().column("names").unwrap().encoding,
            Encoding::Categorical
        );
        assert_eq!(categorical.count_rows().unwrap(), 3);

        let table = categorical.collect().unwrap();
        assert_eq!(
            shared_categories(&table, "names").unwrap(),
            Some(vec!["Alice".to_string(), "Bob".to_string()])
        );
        assert_eq!(
            table.text_values("names").unwrap(),
            reloaded.collect().unwrap().text_values("names").unwrap()
        );
    }

    #[test]
    fn overwritten_group_invalidates_earlier_handles() {
        let (dir, pattern) = csv_dir();
        let container = dir.path().join("accounts.grp");
        LazyFrame::scan_csv(&pattern, &CsvOptions::default())
            .unwrap()
            .write_group(&container, "/data")
            .unwrap();
        let handle = LazyFrame::scan_group(&container, "/data").unwrap();

        let narrow = dir.path().join("narrow");
        std::fs::create_dir(&narrow).unwrap();
        std::fs::write(narrow.join("ids.0.csv"), "id\n1\n2\n").unwrap();
        let narrow_pattern = narrow.join("ids.*.csv").to_string_lossy().into_owned();
        LazyFrame::scan_csv(&narrow_pattern, &CsvOptions::default())
            .unwrap()
            .write_group(&container, "/data")
            .unwrap();
        assert!(matches!(
            handle.sum("amount"),
            Err(Error::GroupChanged { found, .. }) if found == vec!["id"]
        ));

        std::fs::write(
            narrow.join("ids.0.csv"),
            "amount,names,id\n7,Alice,1\n",
        )
        .unwrap();
        LazyFrame::scan_csv(&narrow_pattern, &CsvOptions::default())
            .unwrap()
            .write_group(&container, "/data")
            .unwrap();
        assert!(matches!(handle.collect(), Err(Error::GroupChanged { .. })));

        let fresh = LazyFrame::scan_group(&container, "/data").unwrap();
        assert_eq!(fresh.sum("amount").unwrap(), ColumnSum::Integer(7));
    }

    #[test]
    fn summing_text_and_categorizing_numbers_fail() {
        let (dir, pattern) = csv_dir();
        let frame = LazyFrame::scan_csv(&pattern, &CsvOptions::default()).unwrap();
        assert!(matches!(frame.sum("names"), Err(Error::ColumnType { .. })));
        assert!(matches!(
            frame.clone().categorize("amount"),
            Err(Error::ColumnType { .. })
        ));
        assert!(matches!(
            LazyFrame::scan_group(dir.path().join("missing.grp"), "/data"),
            Err(Error::Io { .. })
        ));
    }
}
