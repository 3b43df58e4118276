use std::io;

use thiserror::Error;

use crate::{key::RowKey, ondisk::SsTableError, partition::LocatorError, store::StoreError};

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("commit locator error: {0}")]
    Locator(#[from] LocatorError),
    #[error("commit store error: {0}")]
    Store(#[from] StoreError),
    #[error("commit sstable error: {0}")]
    SsTable(#[from] SsTableError),
    #[error("commit io error: {0}")]
    Io(#[from] io::Error),
    #[error("commit error: key {0} is owned by no partition")]
    KeyOutOfRange(RowKey),
    #[error("commit error: store kept rejecting the file as out of range after {0} attempts")]
    AttemptsExhausted(usize),
}
