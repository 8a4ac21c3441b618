//! The extraction pipeline: paths in, records out.
//!
//! A [`Pipeline`] consumes a path stream once, runs an [`Extractor`] on each
//! path and forwards every record it emits to a [`Sink`]. It runs synchronously
//! on the calling thread; one instance runs per worker.
//!
//! Extraction failures are budgeted by a [`FailureBudget`]. Failures within the
//! budget are logged, counted and skipped. The failure that exceeds it aborts
//! the run and is returned to the caller. Sink errors (for example a record
//! that violates a fixed schema) are never budgeted and always abort.
//!
//! Records reach the sink as they are extracted. A file that fails part-way
//! within the budget keeps the records it emitted before the error, and
//! since those carry its path and modification time an incremental rebuild
//! treats the file as unchanged. Fix or touch such a file to have it
//! extracted again.
//!
//! A sink that batches may only reject a record when the batch is pushed.
//! The error then names the file that completed the batch, which need not be
//! the file with the offending value.
//!
//! # Example
//!
//! ```
//! use ironhaul::pipeline::{FailureBudget, Pipeline};
//! use ironhaul::record::{Record, RecordBatch};
//! use std::path::Path;
//!
//! let extract = |p: &Path| -> anyhow::Result<Vec<Record>> {
//!     Ok(vec![Record::new().with("name", p.display().to_string())])
//! };
//!
//! let mut batch = RecordBatch::new();
//! let counts = Pipeline::new(["a", "b"], &extract, &mut batch)
//!     .with_budget(FailureBudget::Unlimited)
//!     .run()?;
//! assert_eq!(counts.records, 2);
//! assert_eq!(batch.len(), 2);
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::record::Record;
use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

/// A lazily produced sequence of records; an `Err` item fails the file.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<Record>> + 'a>;

/// Maps one path to zero or more records.
///
/// Any `Fn(&Path) -> Result<I>` where `I: IntoIterator<Item = Record>`
/// implements this trait. Implement it directly for extractors that produce
/// records lazily and may fail part-way through a file.
pub trait Extractor: Send + Sync {
    /// Extract the records of one file.
    ///
    /// # Errors
    /// An error here, or an `Err` item in the returned iterator, marks the file
    /// as failed.
    fn extract<'a>(&'a self, path: &'a Path) -> Result<RecordIter<'a>>;
}

impl<F, I> Extractor for F
where
    F: Fn(&Path) -> Result<I> + Send + Sync,
    I: IntoIterator<Item = Record>,
    I::IntoIter: 'static,
{
    fn extract<'a>(&'a self, path: &'a Path) -> Result<RecordIter<'a>> {
        Ok(Box::new(self(path)?.into_iter().map(Ok)))
    }
}

/// Accepts records one at a time.
pub trait Sink {
    /// Accept one record.
    ///
    /// # Errors
    /// Sink errors abort the pipeline regardless of the failure budget.
    fn accept(&mut self, record: Record) -> Result<()>;
}

impl<F> Sink for F
where
    F: FnMut(Record) -> Result<()>,
{
    fn accept(&mut self, record: Record) -> Result<()> {
        self(record)
    }
}

/// How many failed files a pipeline tolerates before aborting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureBudget {
    /// Tolerate up to `n` failures; failure `n + 1` aborts.
    Limited(u64),
    /// Never abort on extraction failures.
    Unlimited,
}

impl Default for FailureBudget {
    /// Abort on the first failure.
    fn default() -> Self {
        Self::Limited(0)
    }
}

impl FailureBudget {
    /// Map a `max_failures` setting to a budget: unset or negative is unlimited.
    #[must_use]
    pub fn from_max_failures(max_failures: Option<i64>) -> Self {
        match max_failures.and_then(|n| u64::try_from(n).ok()) {
            Some(n) => Self::Limited(n),
            None => Self::Unlimited,
        }
    }

    #[must_use]
    pub const fn is_exceeded_by(self, failures: u64) -> bool {
        match self {
            Self::Limited(max) => failures > max,
            Self::Unlimited => false,
        }
    }
}

/// Counters maintained by a pipeline run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineCounts {
    /// Paths consumed, including failed ones.
    pub files: u64,
    /// Paths whose extraction failed.
    pub failures: u64,
    /// Records forwarded to the sink.
    pub records: u64,
}

impl PipelineCounts {
    #[must_use]
    pub const fn succeeded(&self) -> u64 {
        self.files - self.failures
    }
}

enum FileError {
    Extract(anyhow::Error),
    Sink(anyhow::Error),
}

/// Drives a path stream through an extractor into a sink.
pub struct Pipeline<'a, I, E: ?Sized, S: ?Sized> {
    source: I,
    extract: &'a E,
    sink: &'a mut S,
    budget: FailureBudget,
    counts: PipelineCounts,
}

impl<'a, I, P, E, S> Pipeline<'a, I, E, S>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
    E: Extractor + ?Sized,
    S: Sink + ?Sized,
{
    /// A pipeline with the default budget (abort on first failure).
    pub fn new(source: I, extract: &'a E, sink: &'a mut S) -> Self {
        Self {
            source,
            extract,
            sink,
            budget: FailureBudget::default(),
            counts: PipelineCounts::default(),
        }
    }

    #[must_use]
    pub fn with_budget(mut self, budget: FailureBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Consume the path stream.
    ///
    /// # Errors
    /// Returns the extraction error that exceeded the failure budget, or the
    /// first sink error. Records already forwarded stay in the sink.
    pub fn run(self) -> Result<PipelineCounts> {
        let Self {
            source,
            extract,
            sink,
            budget,
            mut counts,
        } = self;

        for path in source {
            let path = path.as_ref();
            counts.files += 1;
            match process(extract, sink, path, &mut counts) {
                Ok(()) => {}
                Err(FileError::Sink(err)) => {
                    return Err(err.context(format!(
                        "write records (batch ending in {})",
                        path.display()
                    )));
                }
                Err(FileError::Extract(err)) => {
                    counts.failures += 1;
                    if budget.is_exceeded_by(counts.failures) {
                        return Err(err.context(format!(
                            "extract {} (failure {} exceeds budget {budget:?})",
                            path.display(),
                            counts.failures,
                        )));
                    }
                    warn!(path = %path.display(), failures = counts.failures, "extract failed: {err:#}");
                }
            }
        }
        debug!(
            files = counts.files,
            failures = counts.failures,
            records = counts.records,
            "pipeline finished"
        );
        Ok(counts)
    }
}

fn process<E, S>(
    extract: &E,
    sink: &mut S,
    path: &Path,
    counts: &mut PipelineCounts,
) -> Result<(), FileError>
where
    E: Extractor + ?Sized,
    S: Sink + ?Sized,
{
    let records = extract.extract(path).map_err(FileError::Extract)?;
    for record in records {
        let record = record.map_err(FileError::Extract)?;
        sink.accept(record).map_err(FileError::Sink)?;
        counts.records += 1;
    }
    Ok(())
}
