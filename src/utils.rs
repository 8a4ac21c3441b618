//! Utility types and functions for Ironhaul.

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::UNIX_EPOCH;

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([0-9]+(?:\.[0-9]*)?|\.[0-9]+)\s*([A-Za-z]*)\s*$").expect("valid size regex")
});

/// Parse a human-readable byte size such as `"64 MiB"`, `"1.5GB"` or `"512"`.
///
/// Decimal units (`KB`, `MB`, `GB`, `TB`, `PB`) are powers of 1000; binary units
/// (`KiB`, `MiB`, `GiB`, `TiB`, `PiB`) are powers of 1024. Single-letter units
/// (`K`, `M`, `G`, ...) are treated as binary. Units are case-insensitive and a
/// bare number is a count of bytes.
///
/// # Examples
///
/// ```
/// use ironhaul::utils::parse_size;
///
/// assert_eq!(parse_size("64 MiB")?, 64 * 1024 * 1024);
/// assert_eq!(parse_size("2kb")?, 2000);
/// assert_eq!(parse_size("100")?, 100);
/// # Ok::<(), anyhow::Error>(())
/// ```
///
/// # Errors
/// Returns an error if the string isn't a number followed by a known unit.
pub fn parse_size(size: &str) -> Result<u64> {
    let Some(caps) = SIZE_RE.captures(size) else {
        bail!("invalid size: {size:?}");
    };
    let number: f64 = caps[1]
        .parse()
        .with_context(|| format!("invalid size number in {size:?}"))?;
    let multiplier: u64 = match caps[2].to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kb" => 1000,
        "mb" => 1000_u64.pow(2),
        "gb" => 1000_u64.pow(3),
        "tb" => 1000_u64.pow(4),
        "pb" => 1000_u64.pow(5),
        "k" | "kib" => 1 << 10,
        "m" | "mib" => 1 << 20,
        "g" | "gib" => 1 << 30,
        "t" | "tib" => 1 << 40,
        "p" | "pib" => 1 << 50,
        unit => bail!("unknown size unit {unit:?} in {size:?}"),
    };
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bytes = (number * multiplier as f64).round() as u64;
    Ok(bytes)
}

/// A byte threshold given either as a raw count or a human-readable string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BufferSize {
    Bytes(u64),
    Human(String),
}

impl BufferSize {
    /// Resolve to a byte count.
    ///
    /// # Errors
    /// Returns an error if a human-readable size fails to parse.
    pub fn to_bytes(&self) -> Result<u64> {
        match self {
            Self::Bytes(n) => Ok(*n),
            Self::Human(s) => parse_size(s),
        }
    }
}

impl Default for BufferSize {
    fn default() -> Self {
        Self::Human("64 MiB".to_string())
    }
}

impl From<u64> for BufferSize {
    fn from(n: u64) -> Self {
        Self::Bytes(n)
    }
}

impl From<&str> for BufferSize {
    fn from(s: &str) -> Self {
        Self::Human(s.to_string())
    }
}

impl fmt::Display for BufferSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(n) => write!(f, "{n} B"),
            Self::Human(s) => f.write_str(s),
        }
    }
}

/// Make `path` absolute against the current directory without resolving
/// symlinks.
///
/// # Errors
/// Returns an error if the current directory can't be determined.
pub fn absolute_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    std::path::absolute(path).with_context(|| format!("make {} absolute", path.display()))
}

/// Modification time as floating-point seconds since the Unix epoch.
///
/// # Errors
/// Returns an error if the platform doesn't report modification times.
pub fn mtime_secs(meta: &Metadata) -> Result<f64> {
    let modified = meta.modified().context("read modification time")?;
    Ok(match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_secs_f64(),
        Err(before) => -before.duration().as_secs_f64(),
    })
}
