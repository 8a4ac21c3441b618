//! Ready-made extractors and extractor combinators.
//!
//! - [`file_meta`] builds the reserved metadata fields for one file:
//!   `file_path` and `mod_time`.
//! - [`with_file_meta`] wraps any extractor so every record it emits starts
//!   with those fields, which is what incremental builds index on.
//! - [`JsonlExtractor`] (feature `io-jsonl`) reads newline-delimited JSON
//!   objects, one record per non-empty line.

use crate::index::{MTIME_COLUMN, PATH_COLUMN};
use crate::pipeline::{Extractor, RecordIter};
use crate::record::Record;
use crate::utils::{absolute_path, mtime_secs};
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;

/// Metadata record for one file.
///
/// `file_path` is absolute but not symlink-resolved; `mod_time` is the
/// modification time of the file the path points to (following symlinks), in
/// epoch seconds.
///
/// # Errors
/// Returns an error if the file's metadata can't be read.
pub fn file_meta(path: impl AsRef<Path>) -> Result<Record> {
    let path = absolute_path(path)?;
    let meta = std::fs::metadata(&path).with_context(|| format!("stat {}", path.display()))?;
    let mod_time = mtime_secs(&meta)?;

    Ok(Record::new()
        .with(PATH_COLUMN, path.to_string_lossy().into_owned())
        .with(MTIME_COLUMN, mod_time))
}

/// An extractor that prefixes each record of `inner` with [`file_meta`].
#[derive(Clone, Debug)]
pub struct WithFileMeta<E> {
    inner: E,
}

/// Wrap `extract` so its records carry the reserved metadata columns first.
pub fn with_file_meta<E: Extractor>(extract: E) -> WithFileMeta<E> {
    WithFileMeta { inner: extract }
}

impl<E: Extractor> Extractor for WithFileMeta<E> {
    fn extract<'a>(&'a self, path: &'a Path) -> Result<RecordIter<'a>> {
        let meta = file_meta(path)?;
        let records = self.inner.extract(path)?;
        Ok(Box::new(records.map(move |record| {
            record.map(|record| record.prefixed(meta.clone()))
        })))
    }
}

/// Reads newline-delimited JSON objects, one record per non-empty line.
///
/// Lines are read lazily; a line that doesn't parse as a JSON object fails
/// the file at that point.
#[cfg(feature = "io-jsonl")]
#[derive(Clone, Copy, Debug)]
pub struct JsonlExtractor {
    /// Prefix each record with [`file_meta`].
    pub file_meta: bool,
}

#[cfg(feature = "io-jsonl")]
impl JsonlExtractor {
    /// A JSONL extractor that adds the reserved metadata columns.
    #[must_use]
    pub const fn new() -> Self {
        Self { file_meta: true }
    }

    /// A JSONL extractor that emits only the parsed objects.
    #[must_use]
    pub const fn without_file_meta() -> Self {
        Self { file_meta: false }
    }
}

#[cfg(feature = "io-jsonl")]
impl Default for JsonlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "io-jsonl")]
impl Extractor for JsonlExtractor {
    fn extract<'a>(&'a self, path: &'a Path) -> Result<RecordIter<'a>> {
        use std::fs::File;
        use std::io::{BufRead, BufReader};

        let meta = if self.file_meta {
            Some(file_meta(path)?)
        } else {
            None
        };
        let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let lines = BufReader::new(f).lines().enumerate();

        Ok(Box::new(lines.filter_map(move |(i, line)| {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    return Some(Err(anyhow::Error::new(err).context(format!(
                        "read line {} in {}",
                        i + 1,
                        path.display()
                    ))));
                }
            };
            if line.trim().is_empty() {
                return None;
            }
            let parsed = serde_json::from_str::<Value>(&line)
                .map_err(anyhow::Error::new)
                .and_then(Record::from_value)
                .with_context(|| format!("parse JSONL line {} in {}", i + 1, path.display()));
            Some(match (parsed, &meta) {
                (Ok(record), Some(meta)) => Ok(record.prefixed(meta.clone())),
                (parsed, _) => parsed,
            })
        })))
    }
}
