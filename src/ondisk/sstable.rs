//! Parquet encoding of staged files.
//!
//! One parquet row per cell: `_seq`, `row_key`, `family`, `qualifier`,
//! `value`, ordered by `(row_key, _seq, family, qualifier)`. The owning
//! partition, key range and entry counts travel in the file-level key/value
//! metadata so a file can be described without scanning it.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::{
    array::{
        Array, ArrayRef, BinaryArray, BinaryBuilder, RecordBatch, StringArray, StringBuilder,
        UInt64Array, UInt64Builder,
    },
    datatypes::{DataType, Field, Schema, SchemaRef},
    error::ArrowError,
};
use futures_util::TryStreamExt;
use once_cell::sync::Lazy;
use parquet::{
    arrow::{async_writer::AsyncArrowWriter, ParquetRecordBatchStreamBuilder},
    basic::{Compression, ZstdLevel},
    errors::ParquetError,
    file::properties::WriterProperties,
    format::KeyValue,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::File;

use crate::{
    fs::{file_name, generate_file_id, remove_if_exists, FileId, FileType},
    key::RowKey,
    mutation::{Families, Mutation},
    ondisk::StagedFile,
    option::LoadOption,
    partition::PartitionId,
};

pub(crate) const SEQ_COL: &str = "_seq";
pub(crate) const ROW_KEY_COL: &str = "row_key";
pub(crate) const FAMILY_COL: &str = "family";
pub(crate) const QUALIFIER_COL: &str = "qualifier";
pub(crate) const VALUE_COL: &str = "value";

const PARTITION_META: &str = "bulkload.partition";
const MIN_KEY_META: &str = "bulkload.min_key";
const MAX_KEY_META: &str = "bulkload.max_key";
const MUTATIONS_META: &str = "bulkload.mutations";
const CELLS_META: &str = "bulkload.cells";

static CELL_SCHEMA: Lazy<SchemaRef> = Lazy::new(|| {
    Arc::new(Schema::new(vec![
        Field::new(SEQ_COL, DataType::UInt64, false),
        Field::new(ROW_KEY_COL, DataType::Binary, false),
        Field::new(FAMILY_COL, DataType::Utf8, false),
        Field::new(QUALIFIER_COL, DataType::Binary, false),
        Field::new(VALUE_COL, DataType::Binary, false),
    ]))
});

/// Arrow schema of a staged file.
pub fn cell_schema() -> SchemaRef {
    Arc::clone(&CELL_SCHEMA)
}

/// Compression choices supported by the staged file writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SsTableCompression {
    /// Leave pages uncompressed (useful for tests and debugging).
    None,
    #[default]
    Snappy,
    /// Zstd with default tuning.
    Zstd,
}

#[derive(Debug, Error)]
pub enum SsTableError {
    #[error("sstable io error: {0}")]
    Io(#[from] io::Error),
    #[error("sstable parquet error: {0}")]
    Parquet(#[from] ParquetError),
    #[error("sstable arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("sstable hex error: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("sstable missing metadata: {0}")]
    MissingMetadata(&'static str),
    #[error("sstable invalid metadata {key}: {reason}")]
    InvalidMetadata { key: &'static str, reason: String },
    #[error("sstable unexpected column layout: {0}")]
    Schema(String),
    #[error("sstable unknown column family: {0}")]
    UnknownFamily(String),
    #[error("sstable file name is not a staged file id: {0}")]
    InvalidFileName(PathBuf),
    #[error("sstable entry {key} at seq {seq} is out of order")]
    OutOfOrder { key: RowKey, seq: u64 },
    #[error("sstable entry {0} outside the declared key range")]
    OutOfRange(RowKey),
    #[error("parquet writer already closed")]
    WriterClosed,
    #[error("sstable wrote {written} {what}, declared {declared}")]
    CountMismatch {
        what: &'static str,
        written: u64,
        declared: u64,
    },
}

/// What a staged file holds, known before it is written and recorded in its
/// footer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSummary {
    pub partition: PartitionId,
    pub min_key: RowKey,
    pub max_key: RowKey,
    pub mutations: u64,
    pub cells: u64,
}

impl FileSummary {
    /// Summary of the non-empty mutations in `entries`; `None` if there are
    /// none.
    pub fn of<'a>(
        partition: PartitionId,
        entries: impl IntoIterator<Item = &'a Mutation>,
    ) -> Option<Self> {
        let mut summary: Option<FileSummary> = None;
        for mutation in entries.into_iter().filter(|mutation| !mutation.is_empty()) {
            let key = mutation.key();
            match summary.as_mut() {
                None => {
                    summary = Some(FileSummary {
                        partition,
                        min_key: key.clone(),
                        max_key: key.clone(),
                        mutations: 1,
                        cells: mutation.len() as u64,
                    })
                }
                Some(summary) => {
                    if key < &summary.min_key {
                        summary.min_key = key.clone();
                    }
                    if key > &summary.max_key {
                        summary.max_key = key.clone();
                    }
                    summary.mutations += 1;
                    summary.cells += mutation.len() as u64;
                }
            }
        }
        summary
    }

    fn to_key_value_metadata(&self) -> Vec<KeyValue> {
        [
            (PARTITION_META, self.partition.raw().to_string()),
            (MIN_KEY_META, hex::encode(self.min_key.as_bytes())),
            (MAX_KEY_META, hex::encode(self.max_key.as_bytes())),
            (MUTATIONS_META, self.mutations.to_string()),
            (CELLS_META, self.cells.to_string()),
        ]
        .into_iter()
        .map(|(key, value)| KeyValue {
            key: key.to_string(),
            value: Some(value),
        })
        .collect()
    }

    fn from_key_value_metadata(metadata: Option<&Vec<KeyValue>>) -> Result<Self, SsTableError> {
        let partition = u32::try_from(metadata_number(metadata, PARTITION_META)?).map_err(
            |err| SsTableError::InvalidMetadata {
                key: PARTITION_META,
                reason: err.to_string(),
            },
        )?;

        Ok(FileSummary {
            partition: PartitionId::new(partition),
            min_key: RowKey::from_bytes(hex::decode(metadata_value(metadata, MIN_KEY_META)?)?),
            max_key: RowKey::from_bytes(hex::decode(metadata_value(metadata, MAX_KEY_META)?)?),
            mutations: metadata_number(metadata, MUTATIONS_META)?,
            cells: metadata_number(metadata, CELLS_META)?,
        })
    }
}

fn metadata_value<'a>(
    metadata: Option<&'a Vec<KeyValue>>,
    key: &'static str,
) -> Result<&'a str, SsTableError> {
    metadata
        .and_then(|entries| entries.iter().find(|entry| entry.key == key))
        .and_then(|entry| entry.value.as_deref())
        .ok_or(SsTableError::MissingMetadata(key))
}

fn metadata_number(
    metadata: Option<&Vec<KeyValue>>,
    key: &'static str,
) -> Result<u64, SsTableError> {
    metadata_value(metadata, key)?
        .parse::<u64>()
        .map_err(|err| SsTableError::InvalidMetadata {
            key,
            reason: err.to_string(),
        })
}

fn writer_properties(option: &LoadOption, summary: &FileSummary) -> WriterProperties {
    let compression = match option.compression {
        SsTableCompression::None => Compression::UNCOMPRESSED,
        SsTableCompression::Snappy => Compression::SNAPPY,
        SsTableCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
    };
    WriterProperties::builder()
        .set_compression(compression)
        .set_max_row_group_size(option.max_row_group_size)
        .set_key_value_metadata(Some(summary.to_key_value_metadata()))
        .build()
}

#[derive(Default)]
struct CellColumns {
    seq: UInt64Builder,
    row_key: BinaryBuilder,
    family: StringBuilder,
    qualifier: BinaryBuilder,
    value: BinaryBuilder,
    rows: usize,
}

impl CellColumns {
    fn push(&mut self, seq: u64, mutation: &Mutation, families: &Families) {
        for cell in mutation.cells() {
            self.seq.append_value(seq);
            self.row_key.append_value(mutation.key().as_bytes());
            self.family.append_value(families.name(cell.family));
            self.qualifier.append_value(&cell.qualifier);
            self.value.append_value(&cell.value);
            self.rows += 1;
        }
    }

    fn finish(&mut self) -> Result<RecordBatch, ArrowError> {
        self.rows = 0;
        RecordBatch::try_new(
            cell_schema(),
            vec![
                Arc::new(self.seq.finish()) as ArrayRef,
                Arc::new(self.row_key.finish()) as ArrayRef,
                Arc::new(self.family.finish()) as ArrayRef,
                Arc::new(self.qualifier.finish()) as ArrayRef,
                Arc::new(self.value.finish()) as ArrayRef,
            ],
        )
    }
}

/// Streams sorted mutations of one partition into a new staged file.
///
/// Entries must arrive in `(row key, seq)` order and stay inside the declared
/// [`FileSummary`]; `close` checks the declared counts.
pub(crate) struct SsTableWriter {
    id: FileId,
    path: PathBuf,
    summary: FileSummary,
    families: Families,
    batch_rows: usize,
    writer: Option<AsyncArrowWriter<File>>,
    columns: CellColumns,
    last: Option<(RowKey, u64)>,
    mutations: u64,
    cells: u64,
}

impl SsTableWriter {
    /// Create `<dir>/<fresh id>.parquet`.
    pub(crate) async fn create(
        dir: &Path,
        summary: FileSummary,
        option: &LoadOption,
    ) -> Result<Self, SsTableError> {
        let id = generate_file_id();
        let path = dir.join(file_name(id, FileType::Parquet));
        let file = File::create(&path).await?;
        let writer = match AsyncArrowWriter::try_new(
            file,
            cell_schema(),
            Some(writer_properties(option, &summary)),
        ) {
            Ok(writer) => writer,
            Err(err) => {
                remove_if_exists(&path).await?;
                return Err(err.into());
            }
        };

        Ok(Self {
            id,
            path,
            summary,
            families: option.families.clone(),
            batch_rows: option.batch_rows,
            writer: Some(writer),
            columns: CellColumns::default(),
            last: None,
            mutations: 0,
            cells: 0,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) async fn push(
        &mut self,
        seq: u64,
        mutation: &Mutation,
    ) -> Result<(), SsTableError> {
        if mutation.is_empty() {
            return Ok(());
        }
        let key = mutation.key();
        if key < &self.summary.min_key || key > &self.summary.max_key {
            return Err(SsTableError::OutOfRange(key.clone()));
        }
        if let Some((last_key, last_seq)) = &self.last {
            if (last_key, *last_seq) >= (key, seq) {
                return Err(SsTableError::OutOfOrder {
                    key: key.clone(),
                    seq,
                });
            }
        }
        self.last = Some((key.clone(), seq));

        self.columns.push(seq, mutation, &self.families);
        self.mutations += 1;
        self.cells += mutation.len() as u64;
        if self.columns.rows >= self.batch_rows {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SsTableError> {
        if self.columns.rows == 0 {
            return Ok(());
        }
        let batch = self.columns.finish()?;
        match self.writer.as_mut() {
            Some(writer) => Ok(writer.write(&batch).await?),
            None => Err(SsTableError::WriterClosed),
        }
    }

    /// Finish the file. The partial file is removed if anything fails.
    pub(crate) async fn close(mut self) -> Result<StagedFile, SsTableError> {
        let result = self.close_inner().await;
        if result.is_err() {
            self.writer.take();
            remove_if_exists(&self.path).await?;
        }
        result
    }

    async fn close_inner(&mut self) -> Result<StagedFile, SsTableError> {
        for (what, written, declared) in [
            ("mutations", self.mutations, self.summary.mutations),
            ("cells", self.cells, self.summary.cells),
        ] {
            if written != declared {
                return Err(SsTableError::CountMismatch {
                    what,
                    written,
                    declared,
                });
            }
        }
        self.flush().await?;
        self.writer
            .take()
            .ok_or(SsTableError::WriterClosed)?
            .close()
            .await?;
        let bytes = tokio::fs::metadata(&self.path).await?.len();

        Ok(StagedFile::new(
            self.id,
            self.path.clone(),
            self.summary.clone(),
            bytes,
        ))
    }

    /// Drop the writer and delete what was written so far.
    pub(crate) async fn discard(self) -> io::Result<()> {
        let SsTableWriter { path, writer, .. } = self;
        drop(writer);
        remove_if_exists(&path).await
    }
}

/// Reads a staged file back: its summary from the footer, and its mutations.
pub struct SsTableReader {
    path: PathBuf,
    summary: FileSummary,
    stream: ParquetRecordBatchStreamBuilder<File>,
}

impl SsTableReader {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SsTableError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        let stream = ParquetRecordBatchStreamBuilder::new(file).await?;
        let summary = FileSummary::from_key_value_metadata(
            stream.metadata().file_metadata().key_value_metadata(),
        )?;

        Ok(Self {
            path,
            summary,
            stream,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn summary(&self) -> &FileSummary {
        &self.summary
    }

    /// All mutations with their arrival sequence, in file order.
    pub async fn mutations(
        self,
        families: &Families,
    ) -> Result<Vec<(u64, Mutation)>, SsTableError> {
        let batches: Vec<RecordBatch> = self.stream.build()?.try_collect().await?;

        let mut mutations: Vec<(u64, Mutation)> =
            Vec::with_capacity(self.summary.mutations as usize);
        for batch in &batches {
            let seqs = column::<UInt64Array>(batch, SEQ_COL)?;
            let keys = column::<BinaryArray>(batch, ROW_KEY_COL)?;
            let family_names = column::<StringArray>(batch, FAMILY_COL)?;
            let qualifiers = column::<BinaryArray>(batch, QUALIFIER_COL)?;
            let values = column::<BinaryArray>(batch, VALUE_COL)?;

            for row in 0..batch.num_rows() {
                let seq = seqs.value(row);
                let key = keys.value(row);
                let name = family_names.value(row);
                let family = families
                    .resolve(name)
                    .ok_or_else(|| SsTableError::UnknownFamily(name.to_string()))?;

                let same_entry = matches!(
                    mutations.last(),
                    Some((last_seq, last)) if *last_seq == seq && last.key().as_bytes() == key
                );
                if !same_entry {
                    mutations.push((seq, Mutation::new(RowKey::from_bytes(key))));
                }
                if let Some((_, mutation)) = mutations.last_mut() {
                    mutation.put(
                        family,
                        qualifiers.value(row).to_vec(),
                        values.value(row).to_vec(),
                    );
                }
            }
        }
        Ok(mutations)
    }
}

fn column<'a, T: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a T, SsTableError> {
    batch
        .column_by_name(name)
        .and_then(|array| array.as_any().downcast_ref::<T>())
        .ok_or_else(|| SsTableError::Schema(format!("column {name} missing or mistyped")))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::{FileSummary, SsTableError, SsTableReader, SsTableWriter};
    use crate::{
        key::RowKey,
        mutation::{ColumnFamily, Families, Mutation},
        option::LoadOption,
        partition::PartitionId,
    };

    fn mutation(key: &str, cells: &[(&str, &str)]) -> Mutation {
        let mut mutation = Mutation::new(RowKey::from_bytes(key));
        for (qualifier, value) in cells {
            mutation.put(
                ColumnFamily::Current,
                qualifier.as_bytes().to_vec(),
                value.as_bytes().to_vec(),
            );
        }
        mutation
    }

    #[tokio::test]
    async fn write_then_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let option = LoadOption::new("t", temp_dir.path()).batch_rows(2);
        let entries = vec![
            (0, mutation("a", &[("x", "1"), ("y", "2")])),
            (3, mutation("a", &[("x", "3")])),
            (1, mutation("b", &[("z", "4")])),
        ];
        let summary =
            FileSummary::of(PartitionId::new(5), entries.iter().map(|(_, m)| m)).unwrap();
        assert_eq!(summary.mutations, 3);
        assert_eq!(summary.cells, 4);

        let mut writer = SsTableWriter::create(temp_dir.path(), summary.clone(), &option)
            .await
            .unwrap();
        for (seq, entry) in &entries {
            writer.push(*seq, entry).await.unwrap();
        }
        let staged = writer.close().await.unwrap();
        assert_eq!(staged.partition(), PartitionId::new(5));
        assert_eq!(staged.min_key().as_bytes(), b"a");
        assert_eq!(staged.max_key().as_bytes(), b"b");
        assert!(staged.bytes() > 0);

        let reader = SsTableReader::open(staged.path()).await.unwrap();
        assert_eq!(reader.summary(), &summary);
        let read = reader.mutations(&Families::default()).await.unwrap();
        assert_eq!(read, entries);
    }

    #[tokio::test]
    async fn rejects_out_of_order_entries() {
        let temp_dir = TempDir::new().unwrap();
        let option = LoadOption::new("t", temp_dir.path());
        let first = mutation("b", &[("x", "1")]);
        let second = mutation("a", &[("x", "1")]);
        let summary = FileSummary::of(PartitionId::new(0), [&first, &second]).unwrap();

        let mut writer = SsTableWriter::create(temp_dir.path(), summary, &option)
            .await
            .unwrap();
        writer.push(0, &first).await.unwrap();
        assert!(matches!(
            writer.push(1, &second).await,
            Err(SsTableError::OutOfOrder { .. })
        ));
        let path = writer.path().to_path_buf();
        writer.discard().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn close_checks_declared_counts() {
        let temp_dir = TempDir::new().unwrap();
        let option = LoadOption::new("t", temp_dir.path());
        let entry = mutation("a", &[("x", "1")]);
        let summary = FileSummary::of(PartitionId::new(0), [&entry, &entry]).unwrap();

        let mut writer = SsTableWriter::create(temp_dir.path(), summary, &option)
            .await
            .unwrap();
        writer.push(0, &entry).await.unwrap();
        let path = writer.path().to_path_buf();
        assert!(matches!(
            writer.close().await,
            Err(SsTableError::CountMismatch { what: "mutations", .. })
        ));
        assert!(!path.exists());
    }
}
