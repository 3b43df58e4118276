use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
};

use async_lock::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

use crate::{
    fs::{file_exist, file_name, list_files, remove_if_exists, FileId, FileType},
    key::RowKey,
    mutation::{Families, Mutation},
    observability::{log_debug, log_info, log_warn},
    ondisk::StagedFile,
    partition::{LocatorError, PartitionBoundary, PartitionId, PartitionLocator},
    store::{Adoption, PartitionStore, StoreError},
};

const DATA_DIR: &str = "data";
const PARTITIONS_FILE: &str = "partitions.yaml";

/// On-disk form of a table's partition start keys.
#[derive(Debug, Serialize, Deserialize)]
struct PartitionManifest {
    start_keys: Vec<String>,
}

/// A file owned by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdoptedFile {
    pub id: FileId,
    /// Partition the file was adopted into.
    pub partition: PartitionId,
    pub path: PathBuf,
    pub min_key: RowKey,
    pub max_key: RowKey,
    pub mutations: u64,
    pub checksum: u32,
    pub bytes: u64,
}

/// Range-partitioned table kept in a local directory:
/// `<root>/<table>/partitions.yaml` and `<root>/<table>/data/<id>.parquet`.
///
/// Serves as both the partition locator and the adoption target of a load.
/// Rebalancing takes the boundary write lock, so it never interleaves with
/// the range check and registration of an adoption.
pub struct LocalPartitionStore {
    table: String,
    table_dir: PathBuf,
    boundary: RwLock<PartitionBoundary>,
    files: Mutex<BTreeMap<FileId, AdoptedFile>>,
}

impl LocalPartitionStore {
    /// Create a new table with the given partitions.
    pub async fn create(
        root: impl AsRef<Path>,
        table: &str,
        boundary: PartitionBoundary,
    ) -> Result<Self, StoreError> {
        let table_dir = root.as_ref().join(table);
        if file_exist(table_dir.join(PARTITIONS_FILE)).await? {
            return Err(StoreError::TableExists(table.to_string()));
        }
        tokio::fs::create_dir_all(table_dir.join(DATA_DIR)).await?;
        write_manifest(&table_dir, &boundary).await?;

        log_info!(
            component = "store",
            event = "table_created",
            table = table,
            partitions = boundary.len(),
        );
        Ok(Self {
            table: table.to_string(),
            table_dir,
            boundary: RwLock::new(boundary),
            files: Mutex::new(BTreeMap::new()),
        })
    }

    /// Open an existing table, rebuilding the file registry from its data
    /// directory.
    pub async fn open(root: impl AsRef<Path>, table: &str) -> Result<Self, StoreError> {
        let table_dir = root.as_ref().join(table);
        let manifest_path = table_dir.join(PARTITIONS_FILE);
        if !file_exist(&manifest_path).await? {
            return Err(StoreError::TableNotFound(table.to_string()));
        }
        let manifest: PartitionManifest =
            serde_yaml::from_slice(&tokio::fs::read(&manifest_path).await?)?;
        let start_keys = manifest
            .start_keys
            .iter()
            .map(hex::decode)
            .collect::<Result<Vec<_>, _>>()?;
        let boundary = PartitionBoundary::new(start_keys)?;

        let data_dir = table_dir.join(DATA_DIR);
        tokio::fs::create_dir_all(&data_dir).await?;
        for tmp in list_files(&data_dir, FileType::Tmp).await? {
            log_warn!(
                component = "store",
                event = "stale_tmp_removed",
                path = %tmp.display(),
            );
            remove_if_exists(&tmp).await?;
        }

        let mut files = BTreeMap::new();
        for path in list_files(&data_dir, FileType::Parquet).await? {
            let staged = StagedFile::open(&path).await?;
            let partition = boundary
                .locate(staged.min_key().as_bytes())
                .unwrap_or(staged.partition());
            files.insert(
                staged.id(),
                AdoptedFile {
                    id: staged.id(),
                    partition,
                    path,
                    min_key: staged.min_key().clone(),
                    max_key: staged.max_key().clone(),
                    mutations: staged.mutations(),
                    checksum: checksum(staged.path()).await?,
                    bytes: staged.bytes(),
                },
            );
        }

        log_debug!(
            component = "store",
            event = "table_opened",
            table = table,
            partitions = boundary.len(),
            files = files.len(),
        );
        Ok(Self {
            table: table.to_string(),
            table_dir,
            boundary: RwLock::new(boundary),
            files: Mutex::new(files),
        })
    }

    /// Open `table` if it exists, otherwise create it with `boundary`.
    pub async fn open_or_create(
        root: impl AsRef<Path>,
        table: &str,
        boundary: PartitionBoundary,
    ) -> Result<Self, StoreError> {
        let root = root.as_ref();
        match Self::open(root, table).await {
            Err(StoreError::TableNotFound(_)) => Self::create(root, table, boundary).await,
            other => other,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn data_dir(&self) -> PathBuf {
        self.table_dir.join(DATA_DIR)
    }

    pub async fn boundary(&self) -> PartitionBoundary {
        self.boundary.read().await.clone()
    }

    /// Start a new partition at `key`.
    pub async fn split_at(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut boundary = self.boundary.write().await;
        let mut next = boundary.clone();
        next.split_at(key)?;
        write_manifest(&self.table_dir, &next).await?;
        *boundary = next;

        log_info!(
            component = "store",
            event = "partition_split",
            table = %self.table,
            key = %hex::encode(key),
            partitions = boundary.len(),
        );
        Ok(())
    }

    /// Merge partition `id` into its predecessor.
    pub async fn merge_into_previous(&self, id: PartitionId) -> Result<(), StoreError> {
        let mut boundary = self.boundary.write().await;
        let mut next = boundary.clone();
        next.merge_into_previous(id)?;
        write_manifest(&self.table_dir, &next).await?;
        *boundary = next;

        log_info!(
            component = "store",
            event = "partition_merged",
            table = %self.table,
            partition = %id,
            partitions = boundary.len(),
        );
        Ok(())
    }

    /// Every adopted file, by id.
    pub async fn files(&self) -> Vec<AdoptedFile> {
        self.files.lock().await.values().cloned().collect()
    }

    /// Adopted files whose key range overlaps partition `id`'s current range.
    pub async fn files_in(&self, id: PartitionId) -> Result<Vec<AdoptedFile>, StoreError> {
        let boundary = self.boundary.read().await;
        let range = boundary.range(id).ok_or(StoreError::UnknownPartition(id))?;
        let files = self.files.lock().await;

        Ok(files
            .values()
            .filter(|file| {
                range.end.map_or(true, |end| file.min_key.as_bytes() < end)
                    && file.max_key.as_bytes() >= range.start
            })
            .cloned()
            .collect())
    }

    /// Every stored mutation in key order; same-key mutations in adoption
    /// file order, then arrival order.
    pub async fn scan(&self, families: &Families) -> Result<Vec<Mutation>, StoreError> {
        let files = self.files().await;
        let mut entries = Vec::new();
        for (index, file) in files.iter().enumerate() {
            let staged = StagedFile::open(&file.path).await?;
            for (seq, mutation) in staged.read_mutations(families).await? {
                entries.push((index, seq, mutation));
            }
        }
        entries.sort_by(|(a_file, a_seq, a), (b_file, b_seq, b)| {
            (a.key(), a_file, a_seq).cmp(&(b.key(), b_file, b_seq))
        });
        Ok(entries
            .into_iter()
            .map(|(_, _, mutation)| mutation)
            .collect())
    }

    async fn register(&self, file: AdoptedFile) -> Adoption {
        let mut files = self.files.lock().await;
        match files.get(&file.id) {
            Some(_) => Adoption::AlreadyAdopted,
            None => {
                files.insert(file.id, file);
                Adoption::Adopted
            }
        }
    }
}

impl PartitionLocator for LocalPartitionStore {
    async fn partitions(&self) -> Result<PartitionBoundary, LocatorError> {
        Ok(self.boundary().await)
    }
}

impl PartitionStore for LocalPartitionStore {
    async fn adopt(
        &self,
        partition: PartitionId,
        file: &StagedFile,
    ) -> Result<Adoption, StoreError> {
        let id = file.id();
        let boundary = self.boundary.read().await;
        let range = boundary
            .range(partition)
            .ok_or(StoreError::UnknownPartition(partition))?;
        if !range.covers(file.min_key().as_bytes(), file.max_key().as_bytes()) {
            return Err(StoreError::OutOfRange {
                file: id,
                partition,
            });
        }

        let checksum = checksum(file.path()).await?;
        if let Some(adopted) = self.files.lock().await.get(&id) {
            return if adopted.checksum == checksum {
                log_debug!(
                    component = "store",
                    event = "file_already_adopted",
                    file_id = %id,
                    partition = %partition,
                );
                Ok(Adoption::AlreadyAdopted)
            } else {
                Err(StoreError::ChecksumConflict(id))
            };
        }
        let on_disk = StagedFile::open(file.path()).await?;
        if on_disk.summary() != file.summary() {
            return Err(StoreError::StaleDescriptor(id));
        }

        let data_dir = self.data_dir();
        let tmp_path = data_dir.join(file_name(id, FileType::Tmp));
        let final_path = data_dir.join(file_name(id, FileType::Parquet));
        if let Err(err) = copy_synced(file.path(), &tmp_path).await {
            remove_if_exists(&tmp_path).await?;
            return Err(err.into());
        }
        tokio::fs::rename(&tmp_path, &final_path).await?;

        let adoption = self
            .register(AdoptedFile {
                id,
                partition,
                path: final_path,
                min_key: file.min_key().clone(),
                max_key: file.max_key().clone(),
                mutations: file.mutations(),
                checksum,
                bytes: file.bytes(),
            })
            .await;
        drop(boundary);

        log_info!(
            component = "store",
            event = "file_adopted",
            table = %self.table,
            file_id = %id,
            partition = %partition,
            bytes = file.bytes(),
        );
        Ok(adoption)
    }
}

async fn write_manifest(table_dir: &Path, boundary: &PartitionBoundary) -> Result<(), StoreError> {
    let manifest = PartitionManifest {
        start_keys: boundary.start_keys().iter().map(hex::encode).collect(),
    };
    let tmp_path = table_dir.join(format!("{PARTITIONS_FILE}.{}", FileType::Tmp));
    tokio::fs::write(&tmp_path, serde_yaml::to_string(&manifest)?).await?;
    tokio::fs::rename(&tmp_path, table_dir.join(PARTITIONS_FILE)).await?;
    Ok(())
}

async fn copy_synced(from: &Path, to: &Path) -> io::Result<()> {
    tokio::fs::copy(from, to).await?;
    tokio::fs::File::open(to).await?.sync_all().await
}

/// CRC32 of the file's bytes.
pub(crate) async fn checksum(path: &Path) -> io::Result<u32> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finalize())
}
