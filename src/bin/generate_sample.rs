use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use rusty_store_bench::data::sample::{write_accounts, SampleSpec};

/// Write deterministic `accounts.<i>.csv` input files.
#[derive(Debug, Parser)]
struct Args {
    /// Output directory
    #[arg(long, default_value = "data")]
    dir: PathBuf,

    #[arg(long, default_value_t = 3)]
    files: usize,

    #[arg(long = "rows", default_value_t = 1000)]
    rows_per_file: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let spec = SampleSpec {
        files: args.files,
        rows_per_file: args.rows_per_file,
        seed: args.seed,
    };
    let paths = write_accounts(&args.dir, &spec)
        .with_context(|| format!("writing samples to {}", args.dir.display()))?;

    println!(
        "Wrote {} file(s) of {} rows to {}",
        paths.len(),
        spec.rows_per_file,
        args.dir.display()
    );
    Ok(())
}
