//! Deterministic test datasets.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// One line of a generated JSONL batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    pub a: i64,
    pub b: f64,
    pub c: String,
    pub d: bool,
}

/// SplitMix64: tiny, seedable and stable across platforms.
struct SplitMix64(u64);

impl SplitMix64 {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
}

/// Generate `n` rows from `seed`. The same seed always yields the same rows.
#[must_use]
#[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
pub fn sample_rows(n: usize, seed: u64) -> Vec<SampleRow> {
    let mut rng = SplitMix64(seed);
    (0..n)
        .map(|_| {
            let x = rng.next_u64();
            SampleRow {
                a: (x % 1_000_000) as i64,
                b: (x >> 11) as f64 / (1_u64 << 53) as f64,
                c: format!("{:08x}", x >> 32),
                d: x & 1 == 1,
            }
        })
        .collect()
}

/// Write `n` generated rows to `dir/batch-<seed>.json`, replacing any
/// previous file for that seed. Returns the file's path.
///
/// # Errors
/// Returns an error if the file can't be written.
pub fn write_jsonl_batch(dir: impl AsRef<Path>, n: usize, seed: u64) -> Result<PathBuf> {
    let path = dir.as_ref().join(format!("batch-{seed:04}.json"));
    let f = File::create(&path).with_context(|| format!("create {}", path.display()))?;
    let mut w = BufWriter::new(f);
    for (i, row) in sample_rows(n, seed).iter().enumerate() {
        serde_json::to_writer(&mut w, row)
            .with_context(|| format!("serialize row #{i} to {}", path.display()))?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(path)
}

/// Move a file's modification time `secs` seconds past its current value.
///
/// # Errors
/// Returns an error if the file's times can't be read or set.
pub fn bump_mtime(path: impl AsRef<Path>, secs: u64) -> Result<()> {
    let path = path.as_ref();
    let f = OpenOptions::new()
        .write(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    let current = f
        .metadata()
        .and_then(|m| m.modified())
        .unwrap_or_else(|_| SystemTime::now());
    f.set_modified(current + Duration::from_secs(secs))
        .with_context(|| format!("set mtime of {}", path.display()))
}
