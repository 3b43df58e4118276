use crate::{
    key::RowKeyBuilder,
    mapper::{MalformedRecord, MapperError, PositionalLayout, RecordMapper},
    mutation::Mutation,
    record::{Record, RecordShape},
};

/// Maps rows of a columnar row group, addressed by position.
#[derive(Clone, Debug)]
pub struct ColumnarMapper {
    layout: PositionalLayout,
}

impl ColumnarMapper {
    pub fn new(
        width: usize,
        identity: [usize; 4],
        key_builder: RowKeyBuilder,
    ) -> Result<Self, MapperError> {
        Ok(Self {
            layout: PositionalLayout::new(width, identity, key_builder)?,
        })
    }

    /// Use `names` as qualifiers instead of field ordinals.
    pub fn with_column_names<I, S>(self, names: I) -> Result<Self, MapperError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            layout: self.layout.with_column_names(names)?,
        })
    }

    pub fn width(&self) -> usize {
        self.layout.width()
    }
}

impl RecordMapper for ColumnarMapper {
    fn shape(&self) -> RecordShape {
        RecordShape::Columnar
    }

    fn map(&self, record: &Record) -> Result<Mutation, MalformedRecord> {
        self.layout.map(record)
    }
}
