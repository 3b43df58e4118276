//! Staged file format: parquet writer/reader and the staged file descriptor.

/// Parquet encoding of sorted mutations.
pub mod sstable;

mod staged;

pub use sstable::{cell_schema, FileSummary, SsTableCompression, SsTableError, SsTableReader};
pub use staged::StagedFile;
