//! Build sources: where the input paths come from.
//!
//! A [`Source`] is either a glob pattern (with `**` for recursive matching) or
//! an explicit list of paths. Each call to [`Source::paths`] produces a fresh,
//! lazily consumed stream, so every worker of a parallel build walks its own
//! copy.

use super::glob::iter_glob;
use anyhow::Result;
use std::path::PathBuf;

/// Input file paths for a build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    /// A glob pattern, expanded lazily.
    Pattern(String),
    /// An explicit list of paths, yielded as given.
    Paths(Vec<PathBuf>),
}

/// A lazily consumed stream of input paths.
pub type PathStream = Box<dyn Iterator<Item = PathBuf> + Send>;

impl Source {
    /// A source over an explicit collection of paths.
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self::Paths(paths.into_iter().map(Into::into).collect())
    }

    /// Start a new pass over the source.
    ///
    /// # Errors
    /// Returns an error if a glob pattern is invalid.
    pub fn paths(&self) -> Result<PathStream> {
        match self {
            Self::Pattern(pattern) => Ok(Box::new(iter_glob(pattern)?)),
            Self::Paths(paths) => Ok(Box::new(paths.clone().into_iter())),
        }
    }
}

impl From<&str> for Source {
    fn from(pattern: &str) -> Self {
        Self::Pattern(pattern.to_string())
    }
}

impl From<String> for Source {
    fn from(pattern: String) -> Self {
        Self::Pattern(pattern)
    }
}

impl From<Vec<PathBuf>> for Source {
    fn from(paths: Vec<PathBuf>) -> Self {
        Self::Paths(paths)
    }
}

impl From<&[PathBuf]> for Source {
    fn from(paths: &[PathBuf]) -> Self {
        Self::Paths(paths.to_vec())
    }
}
