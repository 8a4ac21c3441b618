//! Change detection for incremental builds.
//!
//! A [`FileModifiedIndex`] maps absolute file paths to the modification time
//! they had when last extracted. It is loaded from the `file_path` and
//! `mod_time` columns of an existing table and used to filter a path stream
//! down to files that are new or have changed since.
//!
//! Paths are made absolute but are not symlink-resolved, matching what
//! [`file_meta`](crate::extractors::file_meta) records.
//!
//! Loading takes no locks. Reading a table while another process appends
//! segments to it sees whatever segments were committed at listing time.

use crate::error::BuildError;
use crate::io::parquet::{read_batches, segment_schema, table_files};
use crate::utils::{absolute_path, mtime_secs};
use anyhow::{Context, Result};
use arrow::array::{Array, Float64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Reserved column holding each record's absolute source path.
pub const PATH_COLUMN: &str = "file_path";
/// Reserved column holding each source file's modification time in epoch
/// seconds.
pub const MTIME_COLUMN: &str = "mod_time";

/// Absolute path to last-known modification time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FileModifiedIndex {
    index: HashMap<String, f64>,
}

impl FileModifiedIndex {
    #[must_use]
    pub fn new(index: HashMap<String, f64>) -> Self {
        Self { index }
    }

    /// Build an index from Arrow batches holding path and mtime columns.
    ///
    /// When a path appears more than once the latest mtime wins.
    ///
    /// # Errors
    /// Returns [`BuildError::MissingIndexColumns`] if a batch lacks either
    /// column, or an error if a column can't be cast to string / float.
    pub fn from_batches(
        batches: &[RecordBatch],
        path_column: &str,
        mtime_column: &str,
    ) -> Result<Self> {
        let mut index = HashMap::new();
        for batch in batches {
            let (Some(paths), Some(mtimes)) = (
                batch.column_by_name(path_column),
                batch.column_by_name(mtime_column),
            ) else {
                return Err(missing_columns(path_column, mtime_column).into());
            };

            let paths = cast(paths, &DataType::Utf8)
                .with_context(|| format!("cast column {path_column} to string"))?;
            let mtimes = cast(mtimes, &DataType::Float64)
                .with_context(|| format!("cast column {mtime_column} to float"))?;
            let (Some(paths), Some(mtimes)) = (
                paths.as_any().downcast_ref::<StringArray>(),
                mtimes.as_any().downcast_ref::<Float64Array>(),
            ) else {
                anyhow::bail!("unexpected array types for file index columns");
            };

            for i in 0..batch.num_rows() {
                if paths.is_null(i) || mtimes.is_null(i) {
                    continue;
                }
                let mtime = mtimes.value(i);
                index
                    .entry(paths.value(i).to_string())
                    .and_modify(|m: &mut f64| *m = m.max(mtime))
                    .or_insert(mtime);
            }
        }
        Ok(Self { index })
    }

    /// Load the index from a Parquet file or a directory of segments using the
    /// reserved `file_path` / `mod_time` columns.
    ///
    /// # Errors
    /// See [`FileModifiedIndex::from_parquet_with_columns`].
    pub fn from_parquet(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_parquet_with_columns(path, PATH_COLUMN, MTIME_COLUMN)
    }

    /// Load the index from a Parquet file or a directory of segments.
    ///
    /// # Errors
    /// Returns [`BuildError::MissingIndexColumns`] if any segment lacks either
    /// column, or an error if a segment can't be read.
    pub fn from_parquet_with_columns(
        path: impl AsRef<Path>,
        path_column: &str,
        mtime_column: &str,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut batches = Vec::new();
        for file in table_files(path)? {
            let schema = segment_schema(&file)?;
            if schema.index_of(path_column).is_err() || schema.index_of(mtime_column).is_err() {
                return Err(missing_columns(path_column, mtime_column).into());
            }
            batches.extend(read_batches(&file, Some(&[path_column, mtime_column][..]))?);
        }
        let index = Self::from_batches(&batches, path_column, mtime_column)?;
        debug!(path = %path.display(), entries = index.len(), "loaded file index");
        Ok(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Indexed modification time of an absolute path string.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<f64> {
        self.index.get(path).copied()
    }

    /// Whether `path` is new or has changed since it was indexed.
    ///
    /// Paths that no longer exist are excluded. Unindexed paths are included.
    /// Indexed paths are included only when their current mtime is strictly
    /// greater than the indexed one.
    #[must_use]
    pub fn filter(&self, path: impl AsRef<Path>) -> bool {
        let Ok(path) = absolute_path(path) else {
            return false;
        };
        let Ok(meta) = std::fs::metadata(&path) else {
            return false;
        };
        let Some(old_mtime) = self.get(&path.to_string_lossy()) else {
            return true;
        };
        // An unreadable mtime can't prove the file unchanged.
        mtime_secs(&meta).map_or(true, |mtime| mtime > old_mtime)
    }
}

fn missing_columns(path_column: &str, mtime_column: &str) -> BuildError {
    BuildError::MissingIndexColumns {
        path_column: path_column.to_string(),
        mtime_column: mtime_column.to_string(),
    }
}
