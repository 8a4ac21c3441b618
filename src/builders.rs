//! Table builders: the entry points that wire everything together.
//!
//! - [`build_table`] runs one extraction pipeline in memory and returns the
//!   resulting Arrow batch. No partitioning, no persistence.
//! - [`build_parquet`] extracts into a directory of Parquet segments,
//!   optionally incrementally (only new or changed files) and optionally in
//!   parallel.
//!
//! # Parallel builds
//!
//! Work is split statically: every worker walks the full source and keeps
//! only the paths whose hash maps to its id (see [`crate::partition`]). Each
//! worker owns its path stream, pipeline, writer and output segment, and
//! names that segment `part-<build start>-<worker id>.parquet`, so workers
//! never coordinate.
//!
//! Without `worker_id`, a build with more than one worker runs every worker
//! on its own thread of a dedicated pool and waits for all of them. A worker
//! that fails (or panics) is logged with its id and reported in the
//! [`BuildReport`]; its siblings carry on and its partition is simply absent
//! from the output. With `worker_id`, the call runs exactly that worker's
//! slice, which is how a build is spread over separately scheduled processes
//! (for example the tasks of a job array).
//!
//! # Example
//!
//! ```no_run
//! use ironhaul::builders::{BuildOptions, build_parquet};
//! use ironhaul::extractors::JsonlExtractor;
//!
//! let options = BuildOptions::default().incremental(true).workers(4);
//! let report = build_parquet("data/**/*.jsonl", JsonlExtractor::new(), "table.pqds", &options)?;
//! println!("wrote {} records", report.total_records());
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::error::BuildError;
use crate::index::FileModifiedIndex;
use crate::io::parquet::{list_segments, segment_name, segment_schema};
use crate::io::source::{PathStream, Source};
use crate::partition::hash_partitioner;
use crate::pipeline::{Extractor, FailureBudget, Pipeline, PipelineCounts};
use crate::record::RecordBatch;
use crate::writer::{BufferedTableWriter, WriterOptions};
use anyhow::{Context, Result, anyhow};
use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch as ArrowRecordBatch;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fs;
use std::io::ErrorKind;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use tracing::{info, info_span, warn};

/// Extract records from `source` into an in-memory Arrow batch.
///
/// `max_failures` is the number of failed files to tolerate; `None` or a
/// negative value tolerates any number.
///
/// # Errors
/// Returns an error if the source can't be expanded, the failure budget is
/// exceeded, or the records can't be converted to columns.
pub fn build_table<S, E>(source: S, extract: E, max_failures: Option<i64>) -> Result<ArrowRecordBatch>
where
    S: Into<Source>,
    E: Extractor,
{
    let source = source.into();
    let mut batch = RecordBatch::new();
    let counts = Pipeline::new(source.paths()?, &extract, &mut batch)
        .with_budget(FailureBudget::from_max_failures(max_failures))
        .run()?;
    info!(
        files = counts.files,
        failures = counts.failures,
        records = counts.records,
        "built in-memory table"
    );
    batch.to_arrow()
}

/// Options for [`build_parquet`].
///
/// Loadable from JSON; see [`BuildOptions::from_json_file`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Only process new or changed files, adding segments to an existing table.
    pub incremental: bool,
    /// Remove an existing table before a from-scratch build.
    pub overwrite: bool,
    /// Worker count: unset or 1 runs in-process, zero or negative uses every
    /// available CPU, otherwise that many workers.
    pub workers: Option<i64>,
    /// Run only this worker's slice; requires a positive `workers` and is
    /// incompatible with `overwrite`.
    pub worker_id: Option<usize>,
    /// Failed files to tolerate per worker; unset or negative is unlimited.
    pub max_failures: Option<i64>,
    /// Writer tuning.
    pub writer: WriterOptions,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            incremental: false,
            overwrite: false,
            workers: None,
            worker_id: None,
            max_failures: Some(0),
            writer: WriterOptions::default(),
        }
    }
}

impl BuildOptions {
    /// Read options from a JSON file. Missing keys take their defaults.
    ///
    /// # Errors
    /// Returns an error if the file can't be read or isn't valid JSON options.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse build options {}", path.display()))
    }

    #[must_use]
    pub fn incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    #[must_use]
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    #[must_use]
    pub fn workers(mut self, workers: i64) -> Self {
        self.workers = Some(workers);
        self
    }

    #[must_use]
    pub fn worker_id(mut self, worker_id: usize) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    #[must_use]
    pub fn max_failures(mut self, max_failures: Option<i64>) -> Self {
        self.max_failures = max_failures;
        self
    }

    #[must_use]
    pub fn writer(mut self, writer: WriterOptions) -> Self {
        self.writer = writer;
        self
    }

    /// Check `worker_id` against the other options.
    fn validate(&self) -> Result<(), BuildError> {
        if self.worker_id.is_some() {
            if self.overwrite {
                return Err(BuildError::WorkerIdWithOverwrite);
            }
            if !self.workers.is_some_and(|n| n > 0) {
                return Err(BuildError::WorkerIdRequiresWorkers);
            }
        }
        Ok(())
    }
}

/// Resolve a configured worker count to a concrete one.
#[must_use]
pub fn resolve_workers(workers: Option<i64>) -> usize {
    match workers {
        None => 1,
        Some(n) if n <= 0 => num_cpus::get(),
        Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
    }
}

/// Result of one worker that ran to completion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    /// Which slice of the source this worker owned.
    pub worker_id: usize,
    /// The committed segment, or `None` if the worker had no records to write.
    pub segment: Option<PathBuf>,
    /// What the worker's pipeline processed.
    pub counts: PipelineCounts,
}

/// A worker that failed during a multi-worker build.
#[derive(Debug)]
pub struct WorkerFailure {
    /// The failed worker.
    pub worker_id: usize,
    /// Why it failed.
    pub error: anyhow::Error,
}

/// Outcome of [`build_parquet`].
///
/// A multi-worker build returns normally even when some workers failed;
/// check [`BuildReport::is_complete`] before relying on the output.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Workers that finished, ordered by id.
    pub workers: Vec<WorkerReport>,
    /// Workers that failed, in the order they finished.
    pub failures: Vec<WorkerFailure>,
}

impl BuildReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    #[must_use]
    pub fn total_records(&self) -> u64 {
        self.workers.iter().map(|w| w.counts.records).sum()
    }

    /// Segments committed by this build.
    pub fn segments(&self) -> impl Iterator<Item = &Path> {
        self.workers.iter().filter_map(|w| w.segment.as_deref())
    }
}

/// Everything a worker needs, passed explicitly to each one.
#[derive(Clone, Debug)]
struct WorkerConfig {
    source: Source,
    dest: PathBuf,
    incremental: bool,
    workers: usize,
    budget: FailureBudget,
    writer: WriterOptions,
    start: DateTime<Local>,
}

/// Extract records from `source` into a Parquet table at `dest`.
///
/// `dest` is a directory of segments. A from-scratch build (neither
/// `incremental` nor `worker_id`) refuses an existing `dest` unless
/// `overwrite` is set, in which case the old table is removed first.
/// Incremental and `worker_id` builds add segments in place.
///
/// # Errors
/// Configuration errors ([`BuildError`]) are returned before any extraction.
/// A single-worker build, and a `worker_id` build, returns its worker's error
/// directly. Multi-worker builds report worker errors in the
/// [`BuildReport`] instead.
pub fn build_parquet<S, E>(
    source: S,
    extract: E,
    dest: impl AsRef<Path>,
    options: &BuildOptions,
) -> Result<BuildReport>
where
    S: Into<Source>,
    E: Extractor,
{
    let dest = dest.as_ref();
    options.validate()?;
    let workers = resolve_workers(options.workers);
    if let Some(worker_id) = options.worker_id
        && worker_id >= workers
    {
        return Err(BuildError::WorkerIdOutOfRange { worker_id, workers }.into());
    }

    prepare_destination(dest, options)?;

    let config = WorkerConfig {
        source: source.into(),
        dest: dest.to_path_buf(),
        incremental: options.incremental,
        workers,
        budget: FailureBudget::from_max_failures(options.max_failures),
        writer: options.writer.clone(),
        start: Local::now(),
    };
    info!(dest = %dest.display(), workers, incremental = options.incremental, "starting build");

    let report = if workers == 1 {
        BuildReport {
            workers: vec![run_worker(0, &config, &extract)?],
            failures: Vec::new(),
        }
    } else if let Some(worker_id) = options.worker_id {
        BuildReport {
            workers: vec![run_worker(worker_id, &config, &extract)?],
            failures: Vec::new(),
        }
    } else {
        fan_out(&config, &extract)?
    };

    info!(
        records = report.total_records(),
        failed_workers = report.failures.len(),
        "finished build"
    );
    Ok(report)
}

fn prepare_destination(dest: &Path, options: &BuildOptions) -> Result<()> {
    let in_place = options.incremental || options.worker_id.is_some();
    if dest.exists() {
        if !dest.is_dir() {
            return Err(BuildError::NotADirectory(dest.to_path_buf()).into());
        }
        if !in_place {
            if !options.overwrite {
                return Err(BuildError::DestinationExists(dest.to_path_buf()).into());
            }
            info!(dest = %dest.display(), "removing existing table");
            fs::remove_dir_all(dest).with_context(|| format!("remove {}", dest.display()))?;
        }
    }
    fs::create_dir_all(dest).with_context(|| format!("mkdir -p {}", dest.display()))
}

/// Run every worker on a dedicated pool, collecting results as they finish.
fn fan_out<E: Extractor>(config: &WorkerConfig, extract: &E) -> Result<BuildReport> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .thread_name(|i| format!("ironhaul-worker-{i}"))
        .build()
        .context("build worker pool")?;

    let (tx, rx) = mpsc::channel();
    pool.scope(|s| {
        for worker_id in 0..config.workers {
            let tx = tx.clone();
            s.spawn(move |_| {
                let result =
                    panic::catch_unwind(AssertUnwindSafe(|| run_worker(worker_id, config, extract)))
                        .unwrap_or_else(|payload| {
                            Err(anyhow!("worker panicked: {}", panic_message(payload.as_ref())))
                        });
                // The receiver outlives the scope.
                tx.send((worker_id, result)).ok();
            });
        }
    });
    drop(tx);

    let mut report = BuildReport::default();
    for (worker_id, result) in rx {
        match result {
            Ok(worker) => report.workers.push(worker),
            Err(error) => {
                warn!(worker_id, "worker {worker_id} failed: {error:#}");
                report.failures.push(WorkerFailure { worker_id, error });
            }
        }
    }
    report.workers.sort_by_key(|w| w.worker_id);
    Ok(report)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Extract this worker's slice of the source into one new segment.
fn run_worker<E: Extractor + ?Sized>(
    worker_id: usize,
    config: &WorkerConfig,
    extract: &E,
) -> Result<WorkerReport> {
    let span = info_span!("worker", worker_id);
    let _entered = span.enter();

    let dest = &config.dest;
    let mut paths: PathStream = config.source.paths()?;
    let mut writer_options = config.writer.clone();

    let existing = if config.incremental {
        list_segments(dest)?
    } else {
        Vec::new()
    };
    if let Some(first) = existing.first() {
        // Segments committed by concurrent workers after this listing are not
        // indexed; their files are disjoint from this worker's partition.
        let index = FileModifiedIndex::from_parquet(dest)?;
        info!(entries = index.len(), "filtering to new and changed files");
        paths = Box::new(paths.filter(move |p| index.filter(p)));

        // New segments keep the table's existing schema.
        if writer_options.schema.is_none() {
            let schema = segment_schema(first)?;
            writer_options.schema = Some(Arc::new(Schema::new(schema.fields().clone())));
        }
    }

    if config.workers > 1 {
        let owns = hash_partitioner(worker_id, config.workers);
        paths = Box::new(paths.filter(move |p| owns(p.as_path())));
    }

    let segment = dest.join(segment_name(&config.start, worker_id));
    if segment.exists() {
        return Err(BuildError::SegmentExists(segment).into());
    }
    fs::create_dir_all(dest).with_context(|| format!("mkdir -p {}", dest.display()))?;

    // Write under a hidden temporary name and rename into place on success,
    // so a partial segment is never visible under its final name.
    let mut tmp = tempfile::Builder::new()
        .prefix(".part-")
        .suffix(".tmp")
        .tempfile_in(dest)
        .with_context(|| format!("create temporary segment in {}", dest.display()))?;

    let (counts, closed) = {
        let mut writer = BufferedTableWriter::new(tmp.as_file_mut(), writer_options)?;
        let counts = Pipeline::new(paths, extract, &mut writer)
            .with_budget(config.budget)
            .run();
        (counts, writer.close())
    };

    let stats = match closed {
        Ok(stats) => stats,
        // A failed close leaves an unreadable file; prefer the pipeline error.
        Err(close_err) => {
            return Err(match counts {
                Ok(_) => close_err,
                Err(err) => {
                    warn!("closing segment after failure also failed: {close_err:#}");
                    err
                }
            });
        }
    };

    let committed = if stats.flushes > 0 {
        tmp.as_file()
            .sync_all()
            .with_context(|| format!("sync {}", tmp.path().display()))?;
        match tmp.persist_noclobber(&segment) {
            Ok(_) => {}
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {
                return Err(BuildError::SegmentExists(segment).into());
            }
            Err(err) => {
                return Err(anyhow::Error::new(err.error)
                    .context(format!("commit segment {}", segment.display())));
            }
        }
        Some(segment)
    } else {
        None
    };

    let counts = counts?;
    info!(
        files = counts.files,
        failures = counts.failures,
        records = counts.records,
        segment = ?committed,
        "worker finished"
    );
    Ok(WorkerReport {
        worker_id,
        segment: committed,
        counts,
    })
}
