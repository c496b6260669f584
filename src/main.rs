use std::path::PathBuf;

use anyhow::{Context, Result};
use arrow::util::pretty::pretty_format_batches;
use clap::{Args, Parser, Subcommand};

use rusty_store_bench::data::encode::decode;
use rusty_store_bench::{
    BenchConfig, BenchmarkRunner, Container, CsvOptions, Encoding, LazyFrame,
};

#[derive(Debug, Parser)]
#[command(
    name = "rusty-store-bench",
    about = "Time column aggregation over CSV, plain and categorical storage groups"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load CSV, write the raw and categorical groups, and time a column sum on each.
    Run(RunArgs),
    /// List the groups stored in a container.
    Inspect {
        #[arg(default_value = "data/accounts.grp")]
        container: PathBuf,
    },
    /// Print the first rows of a stored group.
    Head {
        container: PathBuf,
        #[arg(long, default_value = "/data")]
        group: String,
        #[arg(long, short = 'n', default_value_t = 10)]
        rows: usize,
        /// Print categorical columns as plain text
        #[arg(long)]
        plain: bool,
    },
    /// Delete a group from a container.
    Remove { container: PathBuf, group: String },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Glob matching the CSV input files
    #[arg(long, default_value = "data/accounts.*.csv")]
    input: String,

    #[arg(long, default_value = "data/accounts.grp")]
    container: PathBuf,

    #[arg(long = "raw-group", default_value = "/data")]
    raw_group: String,

    #[arg(long = "categorical-group", default_value = "/data2")]
    categorical_group: String,

    /// Numeric column to sum
    #[arg(long = "sum-column", default_value = "amount")]
    sum_column: String,

    /// Text column to dictionary-encode
    #[arg(long = "categorical-column", default_value = "names")]
    categorical_column: String,

    /// CSV records sampled for type inference
    #[arg(long = "infer-rows", default_value_t = 1000)]
    infer_rows: usize,
}

impl From<RunArgs> for BenchConfig {
    fn from(args: RunArgs) -> Self {
        BenchConfig {
            input: args.input,
            container: args.container,
            raw_group: args.raw_group,
            categorical_group: args.categorical_group,
            sum_column: args.sum_column,
            categorical_column: args.categorical_column,
            csv: CsvOptions {
                infer_rows: args.infer_rows,
                ..CsvOptions::default()
            },
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Run(args) => {
            let runner = BenchmarkRunner::new(args.into());
            let report = runner.run().with_context(|| {
                format!("benchmark over '{}' failed", runner.config().input)
            })?;
            println!("{report}");
        }
        Command::Inspect { container } => {
            let store = Container::open(&container)
                .with_context(|| format!("opening {}", container.display()))?;
            for (name, entry) in store.groups() {
                let columns: Vec<String> = entry
                    .columns
                    .iter()
                    .map(|c| format!("{}: {}", c.name, c.kind))
                    .collect();
                println!(
                    "{name:<12} rows={:<10} partitions={:<4} bytes={:<10} {}",
                    entry.num_rows(),
                    entry.partitions.len(),
                    entry.length,
                    columns.join(", ")
                );
                for column in entry.categorical_columns() {
                    println!(
                        "{:<12} {}: {} categories",
                        "",
                        column.name,
                        entry.categories.get(&column.name).map_or(0, Vec::len)
                    );
                }
            }
        }
        Command::Head {
            container,
            group,
            rows,
            plain,
        } => {
            let mut table = LazyFrame::scan_group(&container, &group)
                .and_then(|frame| frame.collect())
                .with_context(|| format!("reading {}:{group}", container.display()))?;
            if plain {
                let categorical: Vec<String> = table
                    .schema()
                    .columns()
                    .iter()
                    .filter(|c| c.encoding == Encoding::Categorical)
                    .map(|c| c.name.clone())
                    .collect();
                for column in &categorical {
                    table = decode(table, column).context("decoding categorical column")?;
                }
            }
            let head = table.head(rows);
            println!("{}", pretty_format_batches(&head).context("formatting rows")?);
        }
        Command::Remove { container, group } => {
            let mut store = Container::open(&container)
                .with_context(|| format!("opening {}", container.display()))?;
            if store.remove_group(&group)? {
                println!("removed {group}");
            } else {
                println!("{group} not found in {}", container.display());
            }
        }
    }
    Ok(())
}
