//! Commits staged files into the live partitions of the target store.
//!
//! Every file moves through `Staged -> Validating -> Committing ->
//! Committed`, or ends `Failed`. Validation re-reads the current partition
//! boundaries and splits files that now cross one; a store rejection caused
//! by a concurrent rebalance sends the file back to validation.
mod error;
pub(crate) mod split;

use std::{collections::BTreeMap, fmt, path::PathBuf, sync::Arc};

pub use error::CommitError;
use futures_util::future::join_all;
use lockable::{AsyncLimit, LockableHashMap};

use crate::{
    fs::{list_files, normalize_permissions, remove_if_exists, FileId, FileType},
    observability::{log_debug, log_error, log_info, log_warn},
    ondisk::StagedFile,
    option::LoadOption,
    partition::{LocatorError, PartitionBoundary, PartitionId, PartitionLocator},
    store::{Adoption, PartitionStore},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileState {
    Staged,
    Validating,
    Committing,
    Committed,
    Failed,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileState::Staged => "staged",
            FileState::Validating => "validating",
            FileState::Committing => "committing",
            FileState::Committed => "committed",
            FileState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedFile {
    pub id: FileId,
    pub partition: PartitionId,
    pub adoption: Adoption,
}

#[derive(Debug)]
pub struct FailedFile {
    pub id: FileId,
    pub path: PathBuf,
    /// Target partition, if the file got as far as committing.
    pub partition: Option<PartitionId>,
    /// State the file was in when it failed.
    pub failed_in: FileState,
    pub cause: CommitError,
}

/// What happened to the staging directory after the commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed,
    /// Kept so failed files can be retried.
    Retained,
    /// Every file committed but the directory could not be removed.
    Failed(String),
}

#[derive(Debug)]
pub struct CommitReport {
    pub committed: Vec<CommittedFile>,
    pub failed: Vec<FailedFile>,
    pub cleanup: CleanupOutcome,
}

impl CommitReport {
    /// True only when every staged file was adopted.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Partitions that have at least one failed file.
    pub fn failed_partitions(&self) -> Vec<PartitionId> {
        let mut partitions: Vec<_> = self
            .failed
            .iter()
            .filter_map(|file| file.partition)
            .collect();
        partitions.sort();
        partitions.dedup();
        partitions
    }
}

enum Attempt {
    Committed(CommittedFile),
    Retry(StagedFile),
    Failed(FailedFile),
}

pub struct BulkCommitCoordinator<L, S> {
    option: Arc<LoadOption>,
    locator: L,
    store: S,
    partition_locks: LockableHashMap<Vec<u8>, ()>,
}

impl<L, S> BulkCommitCoordinator<L, S>
where
    L: PartitionLocator + Sync,
    S: PartitionStore + Sync,
{
    pub fn new(option: Arc<LoadOption>, locator: L, store: S) -> Self {
        Self {
            option,
            locator,
            store,
            partition_locks: LockableHashMap::new(),
        }
    }

    pub fn locator(&self) -> &L {
        &self.locator
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Commit every staged file found in the staging directory, e.g. to retry
    /// a load that partially failed.
    pub async fn commit_staging(&self) -> Result<CommitReport, CommitError> {
        let mut files = Vec::new();
        for path in list_files(self.option.staging_path(), FileType::Parquet).await? {
            files.push(StagedFile::open(&path).await?);
        }
        Ok(self.commit(files).await)
    }

    /// Commit `files`. Never rolls back: files adopted before a failure stay
    /// adopted and the staging directory is kept for a retry. Each adopted
    /// file leaves staging right away, so a retry only sees what failed.
    pub async fn commit(&self, files: Vec<StagedFile>) -> CommitReport {
        log_info!(
            component = "commit",
            event = "commit_started",
            table = %self.option.table(),
            files = files.len(),
        );
        if let Err(err) = normalize_permissions(
            self.option.staging_path(),
            self.option.staging_permissions,
        )
        .await
        {
            log_warn!(
                component = "commit",
                event = "staging_permissions_failed",
                error = %err,
            );
        }

        let mut committed = Vec::new();
        let mut failed = Vec::new();
        let mut pending = files;
        let attempts = self.option.commit_attempts;

        for attempt in 1..=attempts {
            if pending.is_empty() {
                break;
            }
            log_debug!(
                component = "commit",
                event = "validation_round",
                attempt = attempt,
                files = pending.len(),
            );
            let boundary = match self.locator.partitions().await {
                Ok(boundary) => boundary,
                Err(err) => {
                    let reason = err.to_string();
                    failed.extend(pending.drain(..).map(|file| FailedFile {
                        id: file.id(),
                        path: file.path().to_path_buf(),
                        partition: None,
                        failed_in: FileState::Validating,
                        cause: CommitError::Locator(LocatorError::Unavailable(reason.clone())),
                    }));
                    break;
                }
            };

            let mut groups: BTreeMap<PartitionId, Vec<StagedFile>> = BTreeMap::new();
            for file in pending.drain(..) {
                match self.validate(file, &boundary).await {
                    Ok(targets) => {
                        for (partition, file) in targets {
                            groups.entry(partition).or_default().push(file);
                        }
                    }
                    Err(failure) => failed.push(failure),
                }
            }

            let rounds = groups.into_iter().map(|(partition, files)| {
                let lock_key = boundary
                    .range(partition)
                    .map(|range| range.start.to_vec())
                    .unwrap_or_default();
                self.commit_partition(partition, lock_key, files)
            });
            for outcome in join_all(rounds).await.into_iter().flatten() {
                match outcome {
                    Attempt::Committed(file) => committed.push(file),
                    Attempt::Retry(file) => pending.push(file),
                    Attempt::Failed(file) => failed.push(file),
                }
            }
        }
        failed.extend(pending.into_iter().map(|file| FailedFile {
            id: file.id(),
            path: file.path().to_path_buf(),
            partition: Some(file.partition()),
            failed_in: FileState::Committing,
            cause: CommitError::AttemptsExhausted(attempts),
        }));

        let cleanup = if failed.is_empty() {
            self.remove_staging().await
        } else {
            for file in &failed {
                log_error!(
                    component = "commit",
                    event = "file_failed",
                    file_id = %file.id,
                    state = %file.failed_in,
                    error = %file.cause,
                );
            }
            CleanupOutcome::Retained
        };

        log_info!(
            component = "commit",
            event = "commit_finished",
            committed = committed.len(),
            failed = failed.len(),
        );
        CommitReport {
            committed,
            failed,
            cleanup,
        }
    }

    /// Partition(s) the file must be adopted into under `boundary`, splitting
    /// it when it crosses a boundary.
    async fn validate(
        &self,
        file: StagedFile,
        boundary: &PartitionBoundary,
    ) -> Result<Vec<(PartitionId, StagedFile)>, FailedFile> {
        let fail = |file: &StagedFile, cause: CommitError| FailedFile {
            id: file.id(),
            path: file.path().to_path_buf(),
            partition: None,
            failed_in: FileState::Validating,
            cause,
        };

        let Some((first, last)) =
            boundary.locate_range(file.min_key().as_bytes(), file.max_key().as_bytes())
        else {
            let cause = CommitError::KeyOutOfRange(file.min_key().clone());
            return Err(fail(&file, cause));
        };
        if first == last {
            return Ok(vec![(first, file)]);
        }

        log_debug!(
            component = "commit",
            event = "file_crosses_boundary",
            file_id = %file.id(),
            first = %first,
            last = %last,
        );
        match split::split_file(&file, boundary, &self.option).await {
            Ok(children) => Ok(children
                .into_iter()
                .map(|child| (child.partition(), child))
                .collect()),
            Err(cause) => Err(fail(&file, cause)),
        }
    }

    async fn commit_partition(
        &self,
        partition: PartitionId,
        lock_key: Vec<u8>,
        files: Vec<StagedFile>,
    ) -> Vec<Attempt> {
        let _guard = self
            .partition_locks
            .async_lock(lock_key, AsyncLimit::no_limit())
            .await
            .expect("lock map guards are infallible");

        let mut outcomes = Vec::with_capacity(files.len());
        for file in files {
            match self.store.adopt(partition, &file).await {
                Ok(adoption) => {
                    if let Err(err) = remove_if_exists(file.path()).await {
                        log_warn!(
                            component = "commit",
                            event = "staged_file_not_removed",
                            file_id = %file.id(),
                            error = %err,
                        );
                    }
                    log_debug!(
                        component = "commit",
                        event = "file_committed",
                        file_id = %file.id(),
                        partition = %partition,
                        adoption = ?adoption,
                    );
                    outcomes.push(Attempt::Committed(CommittedFile {
                        id: file.id(),
                        partition,
                        adoption,
                    }));
                }
                Err(err) if err.is_out_of_range() => {
                    log_warn!(
                        component = "commit",
                        event = "partition_moved",
                        file_id = %file.id(),
                        partition = %partition,
                    );
                    outcomes.push(Attempt::Retry(file));
                }
                Err(err) => outcomes.push(Attempt::Failed(FailedFile {
                    id: file.id(),
                    path: file.path().to_path_buf(),
                    partition: Some(partition),
                    failed_in: FileState::Committing,
                    cause: err.into(),
                })),
            }
        }
        outcomes
    }

    async fn remove_staging(&self) -> CleanupOutcome {
        let staging = self.option.staging_path();
        match tokio::fs::remove_dir_all(staging).await {
            Ok(()) => CleanupOutcome::Removed,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => CleanupOutcome::Removed,
            Err(err) => {
                log_warn!(
                    component = "commit",
                    event = "staging_cleanup_failed",
                    path = %staging.display(),
                    error = %err,
                );
                CleanupOutcome::Failed(err.to_string())
            }
        }
    }
}
