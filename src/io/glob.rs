//! File globbing utilities for source expansion.
//!
//! Two flavours are provided:
//!
//! - [`iter_glob`] yields matching files lazily in filesystem order, which is
//!   what a build consumes so it never holds the full listing in memory.
//! - [`expand_glob`] collects and sorts the matches for deterministic order.
//!
//! # Pattern Syntax
//!
//! - `*` matches any sequence of characters within a path component
//! - `?` matches any single character
//! - `**` matches zero or more directories
//! - `[abc]` matches any character in the set
//! - `[!abc]` matches any character not in the set
//!
//! Only regular files are returned; directories matching the pattern are
//! skipped.
//!
//! # Examples
//!
//! ```no_run
//! use ironhaul::io::glob::{expand_glob, iter_glob};
//!
//! // Every JSON file below data/, at any depth.
//! for path in iter_glob("data/**/*.json")? {
//!     println!("{}", path.display());
//! }
//!
//! let sorted = expand_glob("logs/*.jsonl")?;
//! # use anyhow::Error; Ok::<(), Error>(())
//! ```

use anyhow::{Context, Result};
use glob::{Paths, glob};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Lazily expand a glob pattern into matching file paths.
///
/// Entries that can't be read while walking (for example a directory without
/// read permission) are logged and skipped.
///
/// # Errors
/// Returns an error if the pattern is invalid.
pub fn iter_glob(pattern: &str) -> Result<impl Iterator<Item = PathBuf> + Send + use<>> {
    let paths: Paths = glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;
    let pattern = pattern.to_string();
    Ok(paths.filter_map(move |entry| match entry {
        Ok(path) if path.is_file() => Some(path),
        Ok(_) => None,
        Err(err) => {
            warn!(pattern = %pattern, "skipping unreadable glob entry: {err}");
            None
        }
    }))
}

/// Expand a glob pattern into a sorted vector of matching file paths.
///
/// No matches is not an error; the result is simply empty.
///
/// # Errors
/// Returns an error if the pattern is invalid or a matched entry can't be read.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;

    let mut result = Vec::new();
    for entry in paths {
        let path =
            entry.with_context(|| format!("error reading glob entry for pattern: {pattern}"))?;
        if path.is_file() {
            result.push(path);
        }
    }
    result.sort();
    Ok(result)
}

/// Build a pattern matching `file_pattern` inside `dir`, escaping any glob
/// metacharacters in the directory name.
#[must_use]
pub fn pattern_in(dir: &Path, file_pattern: &str) -> String {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    format!("{escaped}/{file_pattern}")
}
