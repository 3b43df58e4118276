//! Rewrites a staged file that crosses partition boundaries into one child
//! file per partition.

use std::collections::BTreeMap;

use crate::{
    commit::CommitError,
    fs::{normalize_permissions, remove_if_exists},
    mutation::Mutation,
    observability::{log_info, log_warn},
    ondisk::{sstable::SsTableWriter, FileSummary, StagedFile},
    option::LoadOption,
    partition::{PartitionBoundary, PartitionId},
};

/// Split `file` along `boundary`. Children are written next to the parent
/// with fresh ids, keep each entry's sequence and get the staging
/// permissions; the parent is removed once every child is closed.
pub(crate) async fn split_file(
    file: &StagedFile,
    boundary: &PartitionBoundary,
    option: &LoadOption,
) -> Result<Vec<StagedFile>, CommitError> {
    let mut groups: BTreeMap<PartitionId, Vec<(u64, Mutation)>> = BTreeMap::new();
    for (seq, mutation) in file.read_mutations(&option.families).await? {
        let partition = boundary
            .locate(mutation.key().as_bytes())
            .ok_or_else(|| CommitError::KeyOutOfRange(mutation.key().clone()))?;
        groups.entry(partition).or_default().push((seq, mutation));
    }

    let dir = file
        .path()
        .parent()
        .unwrap_or_else(|| option.staging_path());
    let mut children: Vec<StagedFile> = Vec::with_capacity(groups.len());
    for (partition, entries) in groups {
        match write_child(dir, partition, &entries, option).await {
            Ok(Some(child)) => children.push(child),
            Ok(None) => {}
            Err(err) => {
                for child in &children {
                    if let Err(cleanup) = remove_if_exists(child.path()).await {
                        log_warn!(
                            component = "commit",
                            event = "split_child_not_removed",
                            path = %child.path().display(),
                            error = %cleanup,
                        );
                    }
                }
                return Err(err);
            }
        }
    }
    for child in &children {
        if let Err(err) = normalize_permissions(child.path(), option.staging_permissions).await {
            log_warn!(
                component = "commit",
                event = "staging_permissions_failed",
                path = %child.path().display(),
                error = %err,
            );
        }
    }
    remove_if_exists(file.path()).await?;

    log_info!(
        component = "commit",
        event = "file_split",
        file_id = %file.id(),
        children = children.len(),
    );
    Ok(children)
}

async fn write_child(
    dir: &std::path::Path,
    partition: PartitionId,
    entries: &[(u64, Mutation)],
    option: &LoadOption,
) -> Result<Option<StagedFile>, CommitError> {
    let Some(summary) = FileSummary::of(partition, entries.iter().map(|(_, mutation)| mutation))
    else {
        return Ok(None);
    };
    let mut writer = SsTableWriter::create(dir, summary, option).await?;
    for (seq, mutation) in entries {
        if let Err(err) = writer.push(*seq, mutation).await {
            if let Err(cleanup) = writer.discard().await {
                log_warn!(
                    component = "commit",
                    event = "partial_file_not_removed",
                    partition = %partition,
                    error = %cleanup,
                );
            }
            return Err(err.into());
        }
    }
    Ok(Some(writer.close().await?))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::split_file;
    use crate::{
        assembler::SortedFileAssembler,
        commit::CommitError,
        key::RowKey,
        mutation::{ColumnFamily, Mutation},
        option::LoadOption,
        partition::{PartitionBoundary, PartitionId, StaticLocator},
    };

    async fn stage_one(option: Arc<LoadOption>, keys: &[&str]) -> crate::ondisk::StagedFile {
        let assembler = SortedFileAssembler::new(option);
        for key in keys {
            let mut mutation = Mutation::new(RowKey::from_bytes(key));
            mutation.put(ColumnFamily::Current, b"v".to_vec(), key.as_bytes().to_vec());
            assembler.push(mutation);
        }
        let mut files = assembler
            .finish(&StaticLocator::new(PartitionBoundary::salted(1)))
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        files.remove(0)
    }

    #[tokio::test]
    async fn children_stay_inside_one_partition() {
        let temp_dir = TempDir::new().unwrap();
        let option = Arc::new(LoadOption::new("t", temp_dir.path()));
        let parent = stage_one(option.clone(), &["a", "c", "n", "q", "zz"]).await;
        let boundary = PartitionBoundary::from_split_points(["m", "z"]).unwrap();

        let children = split_file(&parent, &boundary, &option).await.unwrap();
        assert!(!parent.path().exists());
        assert_eq!(children.len(), 3);
        assert_eq!(
            children.iter().map(|child| child.partition()).collect::<Vec<_>>(),
            vec![PartitionId::new(0), PartitionId::new(1), PartitionId::new(2)]
        );
        for child in &children {
            let range = boundary.range(child.partition()).unwrap();
            assert!(range.covers(child.min_key().as_bytes(), child.max_key().as_bytes()));
            assert_eq!(child.path().parent(), Some(temp_dir.path()));
        }
        assert_eq!(children.iter().map(|child| child.mutations()).sum::<u64>(), 5);
    }

    #[tokio::test]
    async fn unowned_keys_fail_and_keep_parent() {
        let temp_dir = TempDir::new().unwrap();
        let option = Arc::new(LoadOption::new("t", temp_dir.path()));
        let parent = stage_one(option.clone(), &["a", "n"]).await;
        let boundary = PartitionBoundary::new(["m", "z"]).unwrap();

        assert!(matches!(
            split_file(&parent, &boundary, &option).await,
            Err(CommitError::KeyOutOfRange(_))
        ));
        assert!(parent.path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn children_get_staging_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let option = Arc::new(LoadOption::new("t", temp_dir.path()).staging_permissions(0o640));
        let parent = stage_one(option.clone(), &["a", "n"]).await;
        let boundary = PartitionBoundary::from_split_points(["m"]).unwrap();

        let children = split_file(&parent, &boundary, &option).await.unwrap();
        assert_eq!(children.len(), 2);
        for child in &children {
            let mode = tokio::fs::metadata(child.path())
                .await
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o640);
        }
    }
}
