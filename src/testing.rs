//! Testing utilities for Ironhaul builds.
//!
//! - **Fixtures**: deterministic JSONL datasets to build tables from, and a
//!   helper to move a file's modification time forward
//!
//! # Quick Start
//!
//! ```no_run
//! use ironhaul::builders::build_table;
//! use ironhaul::extractors::JsonlExtractor;
//! use ironhaul::testing::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let dir = tempfile::tempdir()?;
//! for seed in 0..4 {
//!     write_jsonl_batch(dir.path(), 16, seed)?;
//! }
//! let pattern = format!("{}/*.json", dir.path().display());
//! let table = build_table(pattern.as_str(), JsonlExtractor::new(), Some(0))?;
//! assert_eq!(table.num_rows(), 64);
//! # Ok(())
//! # }
//! ```

pub mod fixtures;

pub use fixtures::*;
