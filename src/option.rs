use std::path::{Path, PathBuf};

use crate::{
    key::{RowKeyBuilder, SaltStrategy, DEFAULT_REGION_COUNT},
    mutation::Families,
    ondisk::SsTableCompression,
};

/// Settings shared by every stage of a bulk load.
#[derive(Debug, Clone)]
pub struct LoadOption {
    pub(crate) table: String,
    pub(crate) staging_path: PathBuf,
    pub(crate) region_count: u32,
    pub(crate) max_partitions: Option<usize>,
    pub(crate) families: Families,
    pub(crate) compression: SsTableCompression,
    pub(crate) max_row_group_size: usize,
    pub(crate) batch_rows: usize,
    pub(crate) salt_strategy: SaltStrategy,
    pub(crate) staging_permissions: u32,
    pub(crate) commit_attempts: usize,
}

impl LoadOption {
    /// Load into `table`, staging files under `staging_path`.
    pub fn new(table: impl Into<String>, staging_path: impl Into<PathBuf>) -> Self {
        LoadOption {
            table: table.into(),
            staging_path: staging_path.into(),
            region_count: DEFAULT_REGION_COUNT,
            max_partitions: None,
            families: Families::default(),
            compression: SsTableCompression::default(),
            max_row_group_size: 64 * 1024,
            batch_rows: 8 * 1024,
            salt_strategy: SaltStrategy::default(),
            staging_permissions: 0o777,
            commit_attempts: 3,
        }
    }

    pub fn region_count(self, region_count: u32) -> Self {
        LoadOption {
            region_count,
            ..self
        }
    }

    /// Upper bound on the number of partitions the assembler will write for.
    /// Defaults to the region count.
    pub fn max_partitions(self, max_partitions: usize) -> Self {
        LoadOption {
            max_partitions: Some(max_partitions),
            ..self
        }
    }

    pub fn families(self, families: Families) -> Self {
        LoadOption { families, ..self }
    }

    pub fn compression(self, compression: SsTableCompression) -> Self {
        LoadOption {
            compression,
            ..self
        }
    }

    pub fn max_row_group_size(self, max_row_group_size: usize) -> Self {
        LoadOption {
            max_row_group_size: max_row_group_size.max(1),
            ..self
        }
    }

    pub fn batch_rows(self, batch_rows: usize) -> Self {
        LoadOption {
            batch_rows: batch_rows.max(1),
            ..self
        }
    }

    pub fn salt_strategy(self, salt_strategy: SaltStrategy) -> Self {
        LoadOption {
            salt_strategy,
            ..self
        }
    }

    /// Unix mode applied to staged files before the store adopts them.
    pub fn staging_permissions(self, staging_permissions: u32) -> Self {
        LoadOption {
            staging_permissions,
            ..self
        }
    }

    /// Validation rounds a file gets when the store keeps rejecting it for
    /// boundary drift.
    pub fn commit_attempts(self, commit_attempts: usize) -> Self {
        LoadOption {
            commit_attempts: commit_attempts.max(1),
            ..self
        }
    }
}

impl LoadOption {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    pub fn families_ref(&self) -> &Families {
        &self.families
    }

    pub fn partition_limit(&self) -> usize {
        self.max_partitions
            .unwrap_or(self.region_count.max(1) as usize)
    }

    pub fn key_builder(&self) -> RowKeyBuilder {
        RowKeyBuilder::new(self.region_count, self.salt_strategy)
    }
}
