use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};

/// Names drawn for the `names` column; few distinct values, many repeats.
pub const NAMES: [&str; 12] = [
    "Alice", "Bob", "Charlie", "Dan", "Edith", "Frank", "George", "Hannah", "Ingrid", "Jerry",
    "Kevin", "Laura",
];

/// Shape of a generated `accounts.*.csv` set.
#[derive(Debug, Clone)]
pub struct SampleSpec {
    pub files: usize,
    pub rows_per_file: usize,
    pub seed: u64,
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            files: 3,
            rows_per_file: 1000,
            seed: 42,
        }
    }
}

/// Write `accounts.<i>.csv` files with columns `id,names,amount` into `dir`.
/// Output is fully determined by the `SampleSpec`: equal inputs give equal bytes.
pub fn write_accounts(dir: &Path, spec: &SampleSpec) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    let mut rng = SimpleRng::new(spec.seed);
    let mut paths = Vec::with_capacity(spec.files);

    for file_no in 0..spec.files {
        let path = dir.join(format!("accounts.{file_no}.csv"));
        let mut writer = csv::Writer::from_path(&path).map_err(|source| Error::Csv {
            path: path.clone(),
            source,
        })?;
        let csv_err = |source: csv::Error| Error::Csv {
            path: path.clone(),
            source,
        };

        writer.write_record(["id", "names", "amount"]).map_err(csv_err)?;
        for _ in 0..spec.rows_per_file {
            let id = rng.next_below(1000);
            let name = NAMES[rng.next_below(NAMES.len() as u64) as usize];
            // Signed amounts so sums exercise cancellation.
            let amount = rng.next_below(4000) as i64 - 1000;
            writer
                .write_record([id.to_string(), name.to_string(), amount.to_string()])
                .map_err(csv_err)?;
        }
        writer.flush().map_err(|e| Error::io(&path, e))?;

        debug!("wrote {} rows to {}", spec.rows_per_file, path.display());
        paths.push(path);
    }
    Ok(paths)
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_below(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }
}
