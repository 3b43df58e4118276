use std::path::{Path, PathBuf};

use crate::{
    fs::{parse_file_id, FileId, FileType},
    key::RowKey,
    mutation::{Families, Mutation},
    ondisk::sstable::{FileSummary, SsTableError, SsTableReader},
    partition::PartitionId,
};

/// Descriptor of one closed, internally sorted staged file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedFile {
    id: FileId,
    path: PathBuf,
    summary: FileSummary,
    bytes: u64,
}

impl StagedFile {
    pub(crate) fn new(id: FileId, path: PathBuf, summary: FileSummary, bytes: u64) -> Self {
        Self {
            id,
            path,
            summary,
            bytes,
        }
    }

    /// Describe an existing staged file from its name and footer.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SsTableError> {
        let path = path.as_ref();
        let id = parse_file_id(path, FileType::Parquet)
            .ok_or_else(|| SsTableError::InvalidFileName(path.to_path_buf()))?;
        let reader = SsTableReader::open(path).await?;
        let bytes = tokio::fs::metadata(path).await?.len();

        Ok(Self::new(id, path.to_path_buf(), reader.summary().clone(), bytes))
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Partition that owned the file's range when it was written.
    pub fn partition(&self) -> PartitionId {
        self.summary.partition
    }

    pub fn min_key(&self) -> &RowKey {
        &self.summary.min_key
    }

    pub fn max_key(&self) -> &RowKey {
        &self.summary.max_key
    }

    pub fn mutations(&self) -> u64 {
        self.summary.mutations
    }

    pub fn cells(&self) -> u64 {
        self.summary.cells
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn summary(&self) -> &FileSummary {
        &self.summary
    }

    pub async fn read_mutations(
        &self,
        families: &Families,
    ) -> Result<Vec<(u64, Mutation)>, SsTableError> {
        SsTableReader::open(&self.path)
            .await?
            .mutations(families)
            .await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::StagedFile;
    use crate::{
        key::RowKey,
        mutation::{ColumnFamily, Mutation},
        ondisk::sstable::{FileSummary, SsTableError, SsTableWriter},
        option::LoadOption,
        partition::PartitionId,
    };

    #[tokio::test]
    async fn open_matches_written_descriptor() {
        let temp_dir = TempDir::new().unwrap();
        let option = LoadOption::new("t", temp_dir.path());
        let mut mutation = Mutation::new(RowKey::from_bytes(b"row"));
        mutation.put(ColumnFamily::Current, b"q".to_vec(), b"v".to_vec());
        let summary = FileSummary::of(PartitionId::new(2), [&mutation]).unwrap();

        let mut writer = SsTableWriter::create(temp_dir.path(), summary, &option)
            .await
            .unwrap();
        writer.push(7, &mutation).await.unwrap();
        let written = writer.close().await.unwrap();

        let opened = StagedFile::open(written.path()).await.unwrap();
        assert_eq!(opened, written);
        assert_eq!(opened.mutations(), 1);
        assert_eq!(opened.cells(), 1);
    }

    #[tokio::test]
    async fn open_rejects_foreign_names() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("part-0000.parquet");
        tokio::fs::write(&path, b"not parquet").await.unwrap();

        assert!(matches!(
            StagedFile::open(&path).await,
            Err(SsTableError::InvalidFileName(_))
        ));
    }
}
