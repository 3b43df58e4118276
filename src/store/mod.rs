//! Adoption contract of the target store, plus a local directory-backed store.
mod local;

use std::{future::Future, io, sync::Arc};

pub use local::{AdoptedFile, LocalPartitionStore};
use thiserror::Error;

use crate::{
    fs::FileId,
    ondisk::{SsTableError, StagedFile},
    partition::{BoundaryError, PartitionId},
};

/// Outcome of a successful adoption.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Adoption {
    Adopted,
    /// The same file (same id and content) was adopted before.
    AlreadyAdopted,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] io::Error),
    #[error("store sstable error: {0}")]
    SsTable(#[from] SsTableError),
    #[error("store boundary error: {0}")]
    Boundary(#[from] BoundaryError),
    #[error("store manifest error: {0}")]
    Manifest(#[from] serde_yaml::Error),
    #[error("store hex error: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("store error: partition {0} does not exist")]
    UnknownPartition(PartitionId),
    #[error("store error: file {file} no longer fits partition {partition}")]
    OutOfRange { file: FileId, partition: PartitionId },
    #[error("store error: file {0} was already adopted with different content")]
    ChecksumConflict(FileId),
    #[error("store error: descriptor of file {0} does not match its footer")]
    StaleDescriptor(FileId),
    #[error("store error: table {0} already exists")]
    TableExists(String),
    #[error("store error: table {0} not found")]
    TableNotFound(String),
}

impl StoreError {
    /// The partition's range moved since the file was validated; the file can
    /// be validated and tried again.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, StoreError::OutOfRange { .. })
    }
}

/// Registers pre-built sorted files as partition data.
///
/// Adoption is atomic per file and idempotent per file id.
pub trait PartitionStore {
    fn adopt(
        &self,
        partition: PartitionId,
        file: &StagedFile,
    ) -> impl Future<Output = Result<Adoption, StoreError>> + Send;
}

impl<T> PartitionStore for Arc<T>
where
    T: PartitionStore,
{
    fn adopt(
        &self,
        partition: PartitionId,
        file: &StagedFile,
    ) -> impl Future<Output = Result<Adoption, StoreError>> + Send {
        T::adopt(self, partition, file)
    }
}
