//! Input expansion and on-disk table layout.

pub mod glob;
pub mod parquet;
pub mod source;
