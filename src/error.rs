//! Typed errors for conditions callers may want to match on.
//!
//! Every fallible function in this crate returns [`anyhow::Result`]. The enums
//! below are wrapped into that `anyhow::Error`, so a caller that needs to tell
//! them apart can use `err.downcast_ref::<BuildError>()`.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration and layout errors raised by the build orchestrator.
///
/// All of these are raised before any record is extracted.
#[derive(Error, Debug)]
pub enum BuildError {
    /// `worker_id` was given without a positive worker count.
    #[error("a positive worker count is required when using worker_id")]
    WorkerIdRequiresWorkers,

    /// `worker_id` was combined with `overwrite`.
    #[error("can't overwrite when using worker_id")]
    WorkerIdWithOverwrite,

    /// `worker_id` does not name one of the configured workers.
    #[error("worker_id {worker_id} out of range for {workers} workers")]
    WorkerIdOutOfRange { worker_id: usize, workers: usize },

    /// A from-scratch build found an existing destination.
    #[error("output directory {0} already exists")]
    DestinationExists(PathBuf),

    /// The destination exists but is not a directory.
    #[error("output path {0} is not a directory")]
    NotADirectory(PathBuf),

    /// A segment with this exact name already exists.
    #[error("segment {0} already exists")]
    SegmentExists(PathBuf),

    /// An existing table lacks the columns the file index needs.
    #[error("table is missing file index columns '{path_column}' and/or '{mtime_column}'")]
    MissingIndexColumns {
        path_column: String,
        mtime_column: String,
    },
}

/// Errors raised while accumulating records or converting them to columns.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecordError {
    /// A record's field set differs from a strict schema.
    #[error("record fields {found:?} do not match schema fields {expected:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// A value cannot be stored in its column's type.
    #[error("column '{column}' expects {expected}, found {found}")]
    TypeMismatch {
        column: String,
        expected: String,
        found: String,
    },

    /// A pinned schema uses a column type records can't be converted into.
    #[error("column '{column}' has unsupported type {data_type}")]
    UnsupportedType { column: String, data_type: String },
}
