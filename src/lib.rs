//! # Ironhaul
//!
//! A **bulk extraction framework** for Rust. Ironhaul walks a glob (or an
//! explicit list of files), runs a user-supplied extractor over each file,
//! and collects the resulting records into a columnar table: either an
//! in-memory Arrow batch or an on-disk Parquet dataset built from
//! independently written segments.
//!
//! ## Key Features
//!
//! - **Pluggable extraction** - any `Fn(&Path) -> Result<impl IntoIterator<Item = Record>>`
//!   is an [`Extractor`]
//! - **Failure budgets** - tolerate a bounded number of files that fail to extract
//! - **Bounded memory** - records are batched, buffered and flushed by size
//! - **Incremental builds** - only new or modified files are re-extracted
//! - **Parallel builds** - a deterministic hash partition splits work across
//!   threads or separately scheduled processes, with no coordination
//! - **Atomic segments** - partial output is never visible under a final name
//!
//! ## Quick Start
//!
//! ```no_run
//! use ironhaul::*;
//! use std::path::Path;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! // One record per file: its size in bytes.
//! let extract = |path: &Path| -> Result<Vec<Record>> {
//!     let len = std::fs::metadata(path)?.len();
//!     Ok(vec![Record::new().with("path", path.display().to_string()).with("len", len)])
//! };
//!
//! // In memory.
//! let table = build_table("logs/*.txt", extract, Some(0))?;
//! println!("{} rows", table.num_rows());
//!
//! // On disk, re-extracting only what changed since the last build.
//! let options = BuildOptions::default().incremental(true).workers(4);
//! let report = build_parquet("logs/*.txt", with_file_meta(extract), "sizes.pqds", &options)?;
//! assert!(report.is_complete());
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is an ordered mapping from field name to JSON value. A
//! [`RecordBatch`] accumulates records and converts them to an Arrow batch,
//! inferring column types or following a pinned schema.
//!
//! ### Pipelines
//!
//! A [`Pipeline`] streams paths through an [`Extractor`] into a [`Sink`].
//! Failed files count against a [`FailureBudget`]; the run returns
//! [`PipelineCounts`].
//!
//! ### Tables
//!
//! A Parquet table is a directory of `part-<timestamp>-<worker>.parquet`
//! segments, each written by one [`BufferedTableWriter`]. Incremental builds
//! index existing segments with a [`FileModifiedIndex`] and parallel builds
//! split paths with [`hash_partitioner`].
//!
//! ## Logging
//!
//! Everything logs through `tracing`. Call [`logging::init_logging`] once to
//! print to stderr, or install any other subscriber.
//!
//! ## Module Overview
//!
//! - [`builders`] - `build_table` and `build_parquet` entry points
//! - [`pipeline`] - the extract loop, failure budgets and the extractor and sink traits
//! - [`record`] - records and record batches
//! - [`writer`] - the buffered Parquet segment writer
//! - [`index`] - the file-modified index behind incremental builds
//! - [`partition`] - hash partitioning of paths over workers
//! - [`extractors`] - file metadata and the JSONL extractor
//! - [`io`] - glob expansion, sources and Parquet table reading
//! - [`testing`] - deterministic fixtures for tests

pub mod builders;
pub mod error;
pub mod extractors;
pub mod index;
pub mod io;
pub mod logging;
pub mod partition;
pub mod pipeline;
pub mod record;
pub mod testing;
pub mod utils;
pub mod writer;

// General re-exports
pub use builders::{BuildOptions, BuildReport, WorkerReport, build_parquet, build_table};
pub use error::{BuildError, RecordError};
pub use extractors::{file_meta, with_file_meta};
pub use index::FileModifiedIndex;
pub use io::parquet::read_table;
pub use io::source::Source;
pub use partition::hash_partitioner;
pub use pipeline::{Extractor, FailureBudget, Pipeline, PipelineCounts, Sink};
pub use record::{Record, RecordBatch};
pub use utils::BufferSize;
pub use writer::{BufferedTableWriter, WriterOptions, WriterStats};

// Gated re-exports
#[cfg(feature = "io-jsonl")]
pub use extractors::JsonlExtractor;
