//! Logging initialization.
//!
//! The crate logs through `tracing`. Applications call [`init_logging`] once
//! at startup; every worker of a parallel build shares the installed
//! subscriber and tags its lines with a `worker{worker_id=..}` span.

use anyhow::{Result, anyhow};
use tracing::Level;
use tracing_subscriber::fmt;

/// Install a formatting subscriber at `level`, writing to stderr.
///
/// # Errors
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(level: Level) -> Result<()> {
    fmt::Subscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("install log subscriber: {e}"))
}

/// Route logs through the test harness's captured output. Safe to call from
/// every test.
pub fn init_test_logging() {
    fmt::Subscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}
