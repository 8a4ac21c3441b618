//! Parquet segment layout and read-back.
//!
//! A persisted table is a directory of segment files named
//! `part-<YYYYMMDDHHMMSS>-<worker id, 4 digits>.parquet`. Every segment of one
//! table shares a single logical schema; readers union them.
//!
//! This module provides:
//! - [`segment_name`] to name a worker's segment for one build
//! - [`list_segments`] to enumerate the committed segments of a table
//! - [`read_batches`] to read one segment, optionally projecting columns
//! - [`read_table`] to read a whole table (file or directory) into one batch

use super::glob::{expand_glob, pattern_in};
use anyhow::{Context, Result};
use arrow::compute::concat_batches;
use arrow::datatypes::{Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, TimeZone};
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fmt::Display;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File extension of committed segments.
pub const SEGMENT_EXTENSION: &str = "parquet";

/// Name of the segment a worker writes during a build started at `start`.
///
/// ```
/// use chrono::{Local, TimeZone};
/// use ironhaul::io::parquet::segment_name;
///
/// let start = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
/// assert_eq!(segment_name(&start, 3), "part-20240309140507-0003.parquet");
/// ```
#[must_use]
pub fn segment_name<Tz: TimeZone>(start: &DateTime<Tz>, worker_id: usize) -> String
where
    Tz::Offset: Display,
{
    format!(
        "part-{}-{worker_id:04}.{SEGMENT_EXTENSION}",
        start.format("%Y%m%d%H%M%S")
    )
}

/// Committed segments of the table at `dir`, sorted by name.
///
/// A missing directory has no segments. In-progress segments are written
/// under a temporary name and are not listed.
///
/// # Errors
/// Returns an error if the directory listing fails.
pub fn list_segments(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    expand_glob(&pattern_in(dir, &format!("*.{SEGMENT_EXTENSION}")))
}

/// Segment files making up the table at `path`: the file itself, or the
/// committed segments of a directory.
///
/// # Errors
/// Returns an error if the directory listing fails.
pub fn table_files(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let path = path.as_ref();
    if path.is_file() {
        Ok(vec![path.to_path_buf()])
    } else {
        list_segments(path)
    }
}

/// Arrow schema stored in a segment's footer.
///
/// # Errors
/// Returns an error if the file can't be opened or isn't valid Parquet.
pub fn segment_schema(path: impl AsRef<Path>) -> Result<SchemaRef> {
    let path = path.as_ref();
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(f)
        .with_context(|| format!("open ParquetRecordBatchReader for {}", path.display()))?;
    Ok(Arc::clone(builder.schema()))
}

/// Read one segment into Arrow batches, optionally projecting `columns`.
///
/// Projected columns come back in file order.
///
/// # Errors
/// Returns an error if the file can't be read or a requested column is missing.
pub fn read_batches(path: impl AsRef<Path>, columns: Option<&[&str]>) -> Result<Vec<RecordBatch>> {
    let path = path.as_ref();
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut builder = ParquetRecordBatchReaderBuilder::try_new(f)
        .with_context(|| format!("open ParquetRecordBatchReader for {}", path.display()))?;

    if let Some(columns) = columns {
        let indices = columns
            .iter()
            .map(|c| {
                builder
                    .schema()
                    .index_of(c)
                    .with_context(|| format!("column {c} not found in {}", path.display()))
            })
            .collect::<Result<Vec<_>>>()?;
        let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
        builder = builder.with_projection(mask);
    }

    let reader = builder
        .with_batch_size(64 * 1024)
        .build()
        .context("build ParquetRecordBatchReader")?;
    reader
        .collect::<Result<Vec<_>, ArrowError>>()
        .with_context(|| format!("read batches from {}", path.display()))
}

/// Read a whole table, a single file or a directory of segments, into one
/// batch.
///
/// An empty or missing directory reads as a zero-row, zero-column batch.
///
/// # Errors
/// Returns an error if any segment can't be read or segments disagree on
/// their schema.
pub fn read_table(path: impl AsRef<Path>) -> Result<RecordBatch> {
    let path = path.as_ref();
    let mut batches = Vec::new();
    for file in table_files(path)? {
        batches.extend(read_batches(&file, None)?);
    }
    let Some(first) = batches.first() else {
        return Ok(RecordBatch::new_empty(Arc::new(Schema::empty())));
    };
    let schema = first.schema();
    concat_batches(&schema, &batches)
        .with_context(|| format!("union segments of {}", path.display()))
}
