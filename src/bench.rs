use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::info;

use crate::data::aggregate::ColumnSum;
use crate::data::loader::CsvOptions;
use crate::error::Result;
use crate::frame::{GroupSummary, LazyFrame};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Inputs of one benchmark run. `Default` holds the stock accounts layout.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Glob over the CSV input files.
    pub input: String,
    pub container: PathBuf,
    pub raw_group: String,
    pub categorical_group: String,
    /// Numeric column that is summed.
    pub sum_column: String,
    /// Text column that is dictionary-encoded for the second group.
    pub categorical_column: String,
    pub csv: CsvOptions,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            input: "data/accounts.*.csv".to_string(),
            container: PathBuf::from("data/accounts.grp"),
            raw_group: "/data".to_string(),
            categorical_group: "/data2".to_string(),
            sum_column: "amount".to_string(),
            categorical_column: "names".to_string(),
            csv: CsvOptions::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// One timed aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingSample {
    /// Which representation was read (`csv`, a group name, ...).
    pub label: String,
    pub column: String,
    pub result: ColumnSum,
    pub elapsed: Duration,
}

/// Force `sum(column)` on `frame` and time it.
pub fn measure(label: &str, frame: &LazyFrame, column: &str) -> Result<TimingSample> {
    let start = Instant::now();
    let result = frame.sum(column)?;
    let elapsed = start.elapsed();
    info!("{label}: sum({column}) = {result} in {elapsed:?}");
    Ok(TimingSample {
        label: label.to_string(),
        column: column.to_string(),
        result,
        elapsed,
    })
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Outcome of a full run.
#[derive(Debug, Clone)]
pub struct BenchReport {
    pub input_files: usize,
    pub csv: TimingSample,
    pub raw_group: GroupSummary,
    pub raw: TimingSample,
    pub categorical_group: GroupSummary,
    pub categorical: TimingSample,
}

impl BenchReport {
    /// Categorical over raw aggregation time. Observational only.
    pub fn time_ratio(&self) -> f64 {
        let raw = self.raw.elapsed.as_secs_f64();
        if raw == 0.0 {
            return f64::NAN;
        }
        self.categorical.elapsed.as_secs_f64() / raw
    }
}

fn kib(bytes: u64) -> f64 {
    bytes as f64 / 1024.0
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "input: {} file(s), {} rows",
            self.input_files, self.raw_group.rows
        )?;
        let lines = [
            (&self.csv, None),
            (&self.raw, Some(&self.raw_group)),
            (&self.categorical, Some(&self.categorical_group)),
        ];
        for (sample, group) in lines {
            write!(
                f,
                "{:<8} sum({}) = {:<14} {:>10.3} ms",
                sample.label,
                sample.column,
                sample.result.to_string(),
                sample.elapsed.as_secs_f64() * 1e3
            )?;
            if let Some(g) = group {
                write!(f, "  {} partitions, {:.1} KiB", g.partitions, kib(g.bytes))?;
            }
            writeln!(f)?;
        }
        write!(f, "categorical/raw time ratio: {:.2}", self.time_ratio())
    }
}

/// Runs the CSV -> raw group -> categorical group pipeline.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkRunner {
    config: BenchConfig,
}

impl BenchmarkRunner {
    pub fn new(config: BenchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn run(&self) -> Result<BenchReport> {
        let cfg = &self.config;

        let csv = LazyFrame::scan_csv(&cfg.input, &cfg.csv)?;
        info!("loaded {csv}");
        let csv_sample = measure("csv", &csv, &cfg.sum_column)?;

        let raw_group = csv.write_group(&cfg.container, &cfg.raw_group)?;
        let raw = LazyFrame::scan_group(&cfg.container, &cfg.raw_group)?;
        let raw_sample = measure(&raw_group.group, &raw, &cfg.sum_column)?;

        let categorical_group = raw
            .clone()
            .categorize(&cfg.categorical_column)?
            .write_group(&cfg.container, &cfg.categorical_group)?;
        let categorical = LazyFrame::scan_group(&cfg.container, &cfg.categorical_group)?;
        let categorical_sample = measure(&categorical_group.group, &categorical, &cfg.sum_column)?;

        Ok(BenchReport {
            input_files: csv.num_partitions(),
            csv: csv_sample,
            raw_group,
            raw: raw_sample,
            categorical_group,
            categorical: categorical_sample,
        })
    }
}
