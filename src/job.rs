//! End-to-end load: map shards concurrently, assemble, commit.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinError;

use crate::{
    assembler::{AssembleError, SortedFileAssembler},
    commit::{BulkCommitCoordinator, CommitReport},
    mapper::{MapStats, Mapper, RecordMapper},
    observability::{log_debug, log_info},
    option::LoadOption,
    partition::PartitionLocator,
    record::Record,
    store::PartitionStore,
};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job assemble error: {0}")]
    Assemble(#[from] AssembleError),
    #[error("job mapping task failed: {0}")]
    Join(#[from] JoinError),
    #[error("job error: assembler still shared after mapping finished")]
    AssemblerShared,
}

#[derive(Debug)]
pub struct JobReport {
    pub stats: MapStats,
    pub staged: usize,
    pub commit: CommitReport,
}

impl JobReport {
    /// True only if every staged file was adopted.
    pub fn is_success(&self) -> bool {
        self.commit.is_success()
    }
}

pub struct BulkLoadJob<L, S> {
    option: Arc<LoadOption>,
    mapper: Arc<Mapper>,
    coordinator: BulkCommitCoordinator<L, S>,
}

impl<L, S> BulkLoadJob<L, S>
where
    L: PartitionLocator + Sync,
    S: PartitionStore + Sync,
{
    pub fn new(option: Arc<LoadOption>, mapper: Mapper, locator: L, store: S) -> Self {
        Self {
            coordinator: BulkCommitCoordinator::new(option.clone(), locator, store),
            option,
            mapper: Arc::new(mapper),
        }
    }

    pub fn coordinator(&self) -> &BulkCommitCoordinator<L, S> {
        &self.coordinator
    }

    /// Map every shard on its own task, then assemble and commit.
    ///
    /// Assembly failures abort before anything is committed. Commit failures
    /// are reported in [`JobReport::commit`].
    pub async fn run<I>(&self, shards: Vec<I>) -> Result<JobReport, JobError>
    where
        I: IntoIterator<Item = Record> + Send + 'static,
        I::IntoIter: Send,
    {
        log_info!(
            component = "job",
            event = "job_started",
            table = %self.option.table(),
            shards = shards.len(),
        );
        let assembler = Arc::new(SortedFileAssembler::new(self.option.clone()));

        let handles: Vec<_> = shards
            .into_iter()
            .enumerate()
            .map(|(shard, records)| {
                let mapper = Arc::clone(&self.mapper);
                let assembler = Arc::clone(&assembler);
                tokio::spawn(async move {
                    let mut stats = MapStats::default();
                    for record in records {
                        if let Some(mutation) = mapper.map_or_skip(&record, &mut stats) {
                            assembler.push(mutation);
                        }
                    }
                    log_debug!(
                        component = "job",
                        event = "shard_mapped",
                        shard = shard,
                        mapped = stats.mapped,
                        skipped = stats.skipped,
                    );
                    stats
                })
            })
            .collect();

        let mut stats = MapStats::default();
        for handle in handles {
            stats.merge(handle.await?);
        }

        let assembler = Arc::into_inner(assembler).ok_or(JobError::AssemblerShared)?;
        let staged = assembler.finish(self.coordinator.locator()).await?;
        let staged_count = staged.len();
        let commit = self.coordinator.commit(staged).await;

        log_info!(
            component = "job",
            event = "job_finished",
            mapped = stats.mapped,
            skipped = stats.skipped,
            staged = staged_count,
            committed = commit.committed.len(),
            failed = commit.failed.len(),
        );
        Ok(JobReport {
            stats,
            staged: staged_count,
            commit,
        })
    }
}
