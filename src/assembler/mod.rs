//! Buffers mutations from concurrent producers and writes them out as one
//! sorted staged file per partition.
mod error;

use std::{
    ops::Bound,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crossbeam_skiplist::SkipMap;
pub use error::AssembleError;

use crate::{
    fs::remove_if_exists,
    key::RowKey,
    mutation::Mutation,
    observability::{log_debug, log_error, log_info, log_warn},
    ondisk::{sstable::SsTableWriter, FileSummary, StagedFile},
    option::LoadOption,
    partition::{PartitionLocator, PartitionRange},
};

/// Buffer key: row key, then arrival order. Same-key entries stay apart and
/// keep the order they were pushed in.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Sequenced {
    key: RowKey,
    seq: u64,
}

pub struct SortedFileAssembler {
    option: Arc<LoadOption>,
    entries: SkipMap<Sequenced, Mutation>,
    next_seq: AtomicU64,
    #[cfg(test)]
    fail_partition: Option<crate::partition::PartitionId>,
}

impl SortedFileAssembler {
    pub fn new(option: Arc<LoadOption>) -> Self {
        Self {
            option,
            entries: SkipMap::new(),
            next_seq: AtomicU64::new(0),
            #[cfg(test)]
            fail_partition: None,
        }
    }

    /// Buffer one mutation. Safe to call from any number of tasks at once.
    pub fn push(&self, mutation: Mutation) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            Sequenced {
                key: mutation.key().clone(),
                seq,
            },
            mutation,
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write one staged file per partition that received entries.
    ///
    /// Partition count limits are checked before anything is written. If any
    /// file fails, the files this call already produced are removed.
    pub async fn finish<L>(self, locator: &L) -> Result<Vec<StagedFile>, AssembleError>
    where
        L: PartitionLocator,
    {
        let boundary = locator.partitions().await?;
        if boundary.is_empty() {
            return Err(AssembleError::NoPartitions);
        }
        let max = self.option.partition_limit();
        if boundary.len() > max {
            return Err(AssembleError::TooManyPartitions {
                found: boundary.len(),
                max,
            });
        }
        let Some(first) = self.entries.front() else {
            log_debug!(
                component = "assembler",
                event = "nothing_to_assemble",
            );
            return Ok(Vec::new());
        };
        if boundary.locate(first.key().key.as_bytes()).is_none() {
            return Err(AssembleError::KeyOutOfRange(first.key().key.clone()));
        }
        drop(first);

        tokio::fs::create_dir_all(self.option.staging_path()).await?;

        let mut staged = Vec::new();
        for range in boundary.ranges() {
            match self.write_partition(range).await {
                Ok(Some(file)) => staged.push(file),
                Ok(None) => {}
                Err(err) => {
                    log_error!(
                        component = "assembler",
                        event = "assemble_failed",
                        partition = %range.id,
                        error = %err,
                    );
                    for file in &staged {
                        if let Err(cleanup) = remove_if_exists(file.path()).await {
                            log_warn!(
                                component = "assembler",
                                event = "staged_file_not_removed",
                                path = %file.path().display(),
                                error = %cleanup,
                            );
                        }
                    }
                    return Err(err);
                }
            }
        }

        log_info!(
            component = "assembler",
            event = "assemble_complete",
            files = staged.len(),
            mutations = self.entries.len(),
        );
        Ok(staged)
    }

    fn range_bounds(range: &PartitionRange<'_>) -> (Bound<Sequenced>, Bound<Sequenced>) {
        let lower = Bound::Included(Sequenced {
            key: RowKey::from_bytes(range.start),
            seq: 0,
        });
        let upper = match range.end {
            Some(end) => Bound::Excluded(Sequenced {
                key: RowKey::from_bytes(end),
                seq: 0,
            }),
            None => Bound::Unbounded,
        };
        (lower, upper)
    }

    fn summarize(&self, range: &PartitionRange<'_>) -> Option<FileSummary> {
        let mut summary: Option<FileSummary> = None;
        for entry in self.entries.range(Self::range_bounds(range)) {
            let mutation = entry.value();
            if mutation.is_empty() {
                continue;
            }
            match summary.as_mut() {
                None => {
                    summary = Some(FileSummary {
                        partition: range.id,
                        min_key: mutation.key().clone(),
                        max_key: mutation.key().clone(),
                        mutations: 1,
                        cells: mutation.len() as u64,
                    })
                }
                Some(summary) => {
                    summary.max_key = mutation.key().clone();
                    summary.mutations += 1;
                    summary.cells += mutation.len() as u64;
                }
            }
        }
        summary
    }

    async fn write_partition(
        &self,
        range: PartitionRange<'_>,
    ) -> Result<Option<StagedFile>, AssembleError> {
        let Some(summary) = self.summarize(&range) else {
            return Ok(None);
        };
        #[cfg(test)]
        if self.fail_partition == Some(range.id) {
            return Err(AssembleError::Io(std::io::Error::other("disk full")));
        }

        let mut writer =
            SsTableWriter::create(self.option.staging_path(), summary, &self.option).await?;
        for entry in self.entries.range(Self::range_bounds(&range)) {
            if let Err(err) = writer.push(entry.key().seq, entry.value()).await {
                if let Err(cleanup) = writer.discard().await {
                    log_warn!(
                        component = "assembler",
                        event = "partial_file_not_removed",
                        partition = %range.id,
                        error = %cleanup,
                    );
                }
                return Err(err.into());
            }
        }
        let file = writer.close().await?;

        log_info!(
            component = "assembler",
            event = "staged_file_written",
            partition = %file.partition(),
            file_id = %file.id(),
            mutations = file.mutations(),
            bytes = file.bytes(),
        );
        Ok(Some(file))
    }
}
