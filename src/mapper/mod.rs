//! Record mappers: decoded input records to salted-key mutations.
//!
//! One variant per input shape, all sharing the [`RecordMapper`] contract.
//! Mappers only hold immutable configuration, so one instance can serve any
//! number of shards concurrently.
mod columnar;
mod delimited;
mod tagged;

use std::sync::Arc;

pub use columnar::ColumnarMapper;
pub use delimited::{DelimitedMapper, CSV_DELIMITER, HIVE_DELIMITER};
pub use tagged::TaggedMapper;
use thiserror::Error;

use crate::{
    key::RowKeyBuilder,
    mutation::{ordinal_qualifier, ColumnFamily, Mutation},
    observability::log_debug,
    record::{Record, RecordShape},
};

/// Why a single record was skipped. Never fatal for the load.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedRecord {
    #[error("malformed record: expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("malformed record: expected schema {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },
    #[error("malformed record: every field is null")]
    Empty,
}

/// Invalid mapper configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MapperError {
    #[error("mapper record width must be at least 1")]
    ZeroWidth,
    #[error("mapper identity position {position} outside record width {width}")]
    IdentityPosition { position: usize, width: usize },
    #[error("mapper identity field {0} not in schema")]
    UnknownField(String),
    #[error("mapper got {found} column names for {width} fields")]
    ColumnNames { found: usize, width: usize },
}

/// Mapped and skipped record counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MapStats {
    pub mapped: u64,
    pub skipped: u64,
}

impl MapStats {
    pub fn merge(&mut self, other: MapStats) {
        self.mapped += other.mapped;
        self.skipped += other.skipped;
    }
}

/// Converts one decoded record into one mutation.
pub trait RecordMapper: Send + Sync {
    fn shape(&self) -> RecordShape;

    fn map(&self, record: &Record) -> Result<Mutation, MalformedRecord>;

    /// Map `record`, counting it as mapped or skipped.
    fn map_or_skip(&self, record: &Record, stats: &mut MapStats) -> Option<Mutation> {
        match self.map(record) {
            Ok(mutation) => {
                stats.mapped += 1;
                Some(mutation)
            }
            Err(err) => {
                stats.skipped += 1;
                log_debug!(
                    component = "mapper",
                    event = "record_skipped",
                    shape = ?self.shape(),
                    error = %err,
                );
                None
            }
        }
    }

    /// Map every record of one input shard.
    fn map_shard<I>(&self, records: I) -> (Vec<Mutation>, MapStats)
    where
        I: IntoIterator<Item = Record>,
        Self: Sized,
    {
        let mut stats = MapStats::default();
        let mutations = records
            .into_iter()
            .filter_map(|record| self.map_or_skip(&record, &mut stats))
            .collect();
        (mutations, stats)
    }
}

/// The closed set of mappers, chosen by the declared input format.
#[derive(Clone, Debug)]
pub enum Mapper {
    Delimited(DelimitedMapper),
    Columnar(ColumnarMapper),
    Tagged(TaggedMapper),
}

impl RecordMapper for Mapper {
    fn shape(&self) -> RecordShape {
        match self {
            Mapper::Delimited(mapper) => mapper.shape(),
            Mapper::Columnar(mapper) => mapper.shape(),
            Mapper::Tagged(mapper) => mapper.shape(),
        }
    }

    fn map(&self, record: &Record) -> Result<Mutation, MalformedRecord> {
        match self {
            Mapper::Delimited(mapper) => mapper.map(record),
            Mapper::Columnar(mapper) => mapper.map(record),
            Mapper::Tagged(mapper) => mapper.map(record),
        }
    }
}

impl From<DelimitedMapper> for Mapper {
    fn from(mapper: DelimitedMapper) -> Self {
        Mapper::Delimited(mapper)
    }
}

impl From<ColumnarMapper> for Mapper {
    fn from(mapper: ColumnarMapper) -> Self {
        Mapper::Columnar(mapper)
    }
}

impl From<TaggedMapper> for Mapper {
    fn from(mapper: TaggedMapper) -> Self {
        Mapper::Tagged(mapper)
    }
}

/// Fixed-width positional records: identity fields at four positions,
/// qualifiers by ordinal or by configured column name.
#[derive(Clone, Debug)]
pub(crate) struct PositionalLayout {
    width: usize,
    identity: [usize; 4],
    column_names: Option<Arc<[Arc<str>]>>,
    key_builder: RowKeyBuilder,
}

impl PositionalLayout {
    pub(crate) fn new(
        width: usize,
        identity: [usize; 4],
        key_builder: RowKeyBuilder,
    ) -> Result<Self, MapperError> {
        if width == 0 {
            return Err(MapperError::ZeroWidth);
        }
        if let Some(&position) = identity.iter().find(|&&position| position >= width) {
            return Err(MapperError::IdentityPosition { position, width });
        }
        Ok(Self {
            width,
            identity,
            column_names: None,
            key_builder,
        })
    }

    pub(crate) fn with_column_names<I, S>(mut self, names: I) -> Result<Self, MapperError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Arc<[Arc<str>]> = names
            .into_iter()
            .map(|name| Arc::from(name.as_ref()))
            .collect();
        if names.len() != self.width {
            return Err(MapperError::ColumnNames {
                found: names.len(),
                width: self.width,
            });
        }
        self.column_names = Some(names);
        Ok(self)
    }

    pub(crate) fn width(&self) -> usize {
        self.width
    }

    pub(crate) fn map(&self, record: &Record) -> Result<Mutation, MalformedRecord> {
        if record.width() != self.width {
            return Err(MalformedRecord::FieldCount {
                expected: self.width,
                found: record.width(),
            });
        }
        let qualifier = |position: usize| match &self.column_names {
            Some(names) => names[position].as_bytes().to_vec(),
            None => ordinal_qualifier(position),
        };
        build_mutation(&self.key_builder, &self.identity, record, qualifier)
    }
}

/// Key the record by its identity fields and write every non-null field into
/// the current family.
pub(crate) fn build_mutation(
    key_builder: &RowKeyBuilder,
    identity: &[usize; 4],
    record: &Record,
    qualifier: impl Fn(usize) -> Vec<u8>,
) -> Result<Mutation, MalformedRecord> {
    let field = |position: usize| record.get(position).unwrap_or_default();
    let key = key_builder.key(
        field(identity[0]),
        field(identity[1]),
        field(identity[2]),
        field(identity[3]),
    );

    let mut mutation = Mutation::new(key);
    for (position, value) in record.iter() {
        if let Some(value) = value {
            mutation.put(ColumnFamily::Current, qualifier(position), value.to_vec());
        }
    }
    if mutation.is_empty() {
        return Err(MalformedRecord::Empty);
    }
    Ok(mutation)
}
