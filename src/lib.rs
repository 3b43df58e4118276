//! Salted row keys and partition-aligned bulk loading for range-partitioned,
//! sorted key-value stores.
//!
//! A load maps decoded input records into mutations keyed by fixed-width
//! salted row keys, assembles them into one sorted parquet file per store
//! partition, and commits those files through the store's per-file adoption
//! primitive, splitting any file whose range drifted across a partition
//! boundary in the meantime.
//!
//! ```ignore
//! let option = Arc::new(LoadOption::new("events", "/data/staging/events"));
//! let store = Arc::new(LocalPartitionStore::open("/data/store", "events").await?);
//! let job = BulkLoadJob::new(option, mapper.into(), store.clone(), store);
//! let report = job.run(shards).await?;
//! assert!(report.is_success());
//! ```

mod observability;

/// Sorted file assembly.
pub mod assembler;

/// Commit coordination.
pub mod commit;

/// YAML job descriptions.
pub mod config;

/// Staging directory helpers.
pub mod fs;

/// Field digests.
pub mod hash;

/// End-to-end load orchestration.
pub mod job;

/// Row keys.
pub mod key;

/// Record mappers.
pub mod mapper;

/// Mutations and column families.
pub mod mutation;

/// Staged file format.
pub mod ondisk;

/// Load settings.
pub mod option;

/// Partition boundaries and location.
pub mod partition;

/// Decoded input records.
pub mod record;

/// Adoption targets.
pub mod store;

pub use crate::{
    assembler::{AssembleError, SortedFileAssembler},
    commit::{BulkCommitCoordinator, CleanupOutcome, CommitError, CommitReport, FileState},
    job::{BulkLoadJob, JobError, JobReport},
    key::{RowKey, RowKeyBuilder, SaltStrategy},
    mapper::{Mapper, MalformedRecord, MapStats, RecordMapper},
    mutation::{ColumnFamily, Families, Mutation},
    ondisk::StagedFile,
    option::LoadOption,
    partition::{PartitionBoundary, PartitionId, PartitionLocator, StaticLocator},
    record::{Record, RecordSchema, RecordShape},
    store::{Adoption, LocalPartitionStore, PartitionStore, StoreError},
};
