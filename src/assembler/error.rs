use std::io;

use thiserror::Error;

use crate::{key::RowKey, ondisk::SsTableError, partition::LocatorError};

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("assemble error: the target table reports no partitions")]
    NoPartitions,
    #[error("assemble error: {found} partitions exceed the limit of {max}")]
    TooManyPartitions { found: usize, max: usize },
    #[error("assemble error: key {0} is owned by no partition")]
    KeyOutOfRange(RowKey),
    #[error("assemble locator error: {0}")]
    Locator(#[from] LocatorError),
    #[error("assemble sstable error: {0}")]
    SsTable(#[from] SsTableError),
    #[error("assemble io error: {0}")]
    Io(#[from] io::Error),
}
