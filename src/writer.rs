//! Buffered, schema-fixing Parquet writer.
//!
//! [`BufferedTableWriter`] turns a stream of [`Record`]s into one Parquet
//! segment while bounding memory with two levels of buffering:
//!
//! 1. Records are appended to a [`RecordBatch`]. When the batch holds
//!    `batch_size` records it is converted to an Arrow batch and pushed onto
//!    an in-memory buffer.
//! 2. When the buffer's estimated size exceeds `buffer_size`, the buffer is
//!    flushed to the underlying Parquet writer as one row group.
//!
//! The schema is inferred from the first non-empty batch and then fixed for
//! the writer's lifetime: every later batch is strict, so a record with a
//! different field set fails with [`RecordError::SchemaMismatch`]. The
//! Parquet writer itself is opened lazily on the first flush, so a writer
//! that never receives a record never touches its output.
//!
//! Values are checked against column types when a batch is converted, so a
//! type error surfaces at the batch boundary and discards the whole pending
//! batch. Row groups flushed before it are unaffected and still get a valid
//! footer on close.
//!
//! [`BufferedTableWriter::close`] performs the final flush and writes the
//! file footer. If the writer is dropped without being closed (for example
//! while an error propagates), the same close runs from `Drop` and any error
//! is logged.
//!
//! # Example
//!
//! ```no_run
//! use ironhaul::record::Record;
//! use ironhaul::writer::{BufferedTableWriter, WriterOptions};
//!
//! let mut writer = BufferedTableWriter::create("table.parquet", WriterOptions::default())?;
//! for i in 0..1000 {
//!     writer.write(Record::new().with("i", i))?;
//! }
//! let stats = writer.close()?;
//! assert_eq!(stats.rows_written, 1000);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! [`RecordError::SchemaMismatch`]: crate::error::RecordError::SchemaMismatch

use crate::pipeline::Sink;
use crate::record::{Record, RecordBatch};
use crate::utils::BufferSize;
use anyhow::{Context, Result, bail};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch as ArrowRecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default number of records per internal batch.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Tuning knobs for [`BufferedTableWriter`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    /// Records per internal batch. Larger batches widen the schema inference
    /// window.
    pub batch_size: usize,
    /// Buffer threshold that triggers a flush, as bytes or a string like
    /// `"64 MiB"`.
    pub buffer_size: BufferSize,
    /// Explicit schema. When set, every record must match it exactly.
    #[serde(skip)]
    pub schema: Option<SchemaRef>,
    /// Parquet compression codec; uncompressed when unset.
    #[serde(skip)]
    pub compression: Option<Compression>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            buffer_size: BufferSize::default(),
            schema: None,
            compression: None,
        }
    }
}

/// Counters describing what a writer has done so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    /// Record batches pushed onto the buffer.
    pub batches_pushed: u64,
    /// Buffer flushes to the Parquet writer.
    pub flushes: u64,
    /// Rows handed to the Parquet writer.
    pub rows_written: u64,
    /// Estimated bytes flushed.
    pub bytes_written: u64,
}

/// Whether the writer's schema is still being inferred.
#[derive(Clone, Debug)]
enum SchemaState {
    Inferring,
    Fixed(SchemaRef),
}

/// Writes records to a Parquet file through a bounded buffer.
pub struct BufferedTableWriter<W: Write + Send> {
    output: Option<W>,
    writer: Option<ArrowWriter<W>>,
    batch: RecordBatch,
    buffer: Vec<ArrowRecordBatch>,
    schema: SchemaState,
    batch_size: usize,
    buffer_limit: u64,
    compression: Option<Compression>,
    durable_bytes: u64,
    buffer_bytes: u64,
    stats: WriterStats,
    closed: bool,
}

impl BufferedTableWriter<File> {
    /// Create (or truncate) `path` and write to it.
    ///
    /// # Errors
    /// Returns an error if the file can't be created or the options are invalid.
    pub fn create(path: impl AsRef<Path>, options: WriterOptions) -> Result<Self> {
        let path = path.as_ref();
        let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
        Self::new(f, options)
    }
}

impl<W: Write + Send> BufferedTableWriter<W> {
    /// Wrap an output handle.
    ///
    /// # Errors
    /// Returns an error if `buffer_size` doesn't parse or `batch_size` is zero.
    pub fn new(output: W, options: WriterOptions) -> Result<Self> {
        if options.batch_size == 0 {
            bail!("batch_size must be positive");
        }
        let buffer_limit = options
            .buffer_size
            .to_bytes()
            .with_context(|| format!("parse buffer size {}", options.buffer_size))?;

        let (schema, batch) = match options.schema {
            Some(schema) => (
                SchemaState::Fixed(Arc::clone(&schema)),
                RecordBatch::strict(schema),
            ),
            None => (SchemaState::Inferring, RecordBatch::new()),
        };

        Ok(Self {
            output: Some(output),
            writer: None,
            batch,
            buffer: Vec::new(),
            schema,
            batch_size: options.batch_size,
            buffer_limit,
            compression: options.compression,
            durable_bytes: 0,
            buffer_bytes: 0,
            stats: WriterStats::default(),
            closed: false,
        })
    }

    /// Write one record.
    ///
    /// # Errors
    /// Returns an error if the record violates the fixed schema, a value can't
    /// be converted, or a triggered flush fails.
    pub fn write(&mut self, record: Record) -> Result<()> {
        if self.closed {
            bail!("write to a closed writer");
        }
        self.batch.append(record)?;

        if self.batch.len() >= self.batch_size {
            self.push_batch()?;
        }
        if self.buffer_bytes > self.buffer_limit {
            self.flush()?;
        }
        Ok(())
    }

    /// Move the current batch onto the buffer, fixing the schema on the first
    /// non-empty batch.
    fn push_batch(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let table = match self.batch.to_arrow() {
            Ok(table) => table,
            Err(err) => {
                // Drop the unconvertible batch so earlier row groups can still
                // be closed out.
                self.batch = match &self.schema {
                    SchemaState::Fixed(schema) => RecordBatch::strict(Arc::clone(schema)),
                    SchemaState::Inferring => RecordBatch::new(),
                };
                return Err(err);
            }
        };

        let schema = match &self.schema {
            SchemaState::Fixed(schema) => Arc::clone(schema),
            SchemaState::Inferring => {
                let schema = table.schema();
                debug!(columns = schema.fields().len(), "fixed writer schema");
                self.schema = SchemaState::Fixed(Arc::clone(&schema));
                schema
            }
        };

        self.buffer_bytes += table.get_array_memory_size() as u64;
        self.buffer.push(table);
        self.batch = RecordBatch::strict(schema);
        self.stats.batches_pushed += 1;
        Ok(())
    }

    /// Push any partial batch and write the buffer out as one row group.
    ///
    /// # Errors
    /// Returns an error if batch conversion or the Parquet write fails.
    pub fn flush(&mut self) -> Result<()> {
        self.push_batch()?;
        if self.buffer.is_empty() {
            return Ok(());
        }
        let SchemaState::Fixed(schema) = &self.schema else {
            bail!("buffer holds batches but no schema was fixed");
        };

        if self.writer.is_none() {
            let output = self.output.take().context("writer output already consumed")?;
            let row_group_rows = usize::try_from(2 * self.buffer_limit).unwrap_or(usize::MAX);
            let props = WriterProperties::builder()
                .set_max_row_group_size(row_group_rows.max(1))
                .set_compression(self.compression.unwrap_or(Compression::UNCOMPRESSED))
                .build();
            let writer = ArrowWriter::try_new(output, Arc::clone(schema), Some(props))
                .context("create ArrowWriter")?;
            self.writer = Some(writer);
        }
        let writer = self.writer.as_mut().context("parquet writer missing")?;

        let mut rows = 0;
        for table in self.buffer.drain(..) {
            rows += table.num_rows() as u64;
            writer.write(&table).context("write batch to parquet")?;
        }
        writer.flush().context("flush parquet row group")?;

        debug!(rows, bytes = self.buffer_bytes, "flushed buffer");
        self.durable_bytes += self.buffer_bytes;
        self.stats.bytes_written = self.durable_bytes;
        self.stats.rows_written += rows;
        self.stats.flushes += 1;
        self.buffer_bytes = 0;
        Ok(())
    }

    /// Flushed bytes plus the current unflushed estimate. Never decreases.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.durable_bytes + self.buffer_bytes
    }

    /// The fixed schema, once inferred or if given explicitly.
    #[must_use]
    pub fn schema(&self) -> Option<&SchemaRef> {
        match &self.schema {
            SchemaState::Fixed(schema) => Some(schema),
            SchemaState::Inferring => None,
        }
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Final flush, then write the footer and close the output.
    ///
    /// # Errors
    /// Returns an error if the final flush or closing the Parquet writer fails.
    pub fn close(mut self) -> Result<WriterStats> {
        self.finish()?;
        Ok(self.stats)
    }

    fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let flushed = self.flush();
        let closed = match self.writer.take() {
            Some(writer) => writer.close().map(|_| ()).context("close ArrowWriter"),
            None => Ok(()),
        };
        flushed.and(closed)
    }
}

impl<W: Write + Send> Sink for BufferedTableWriter<W> {
    fn accept(&mut self, record: Record) -> Result<()> {
        self.write(record)
    }
}

impl<W: Write + Send> Drop for BufferedTableWriter<W> {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            warn!("closing dropped writer failed: {err:#}");
        }
    }
}
