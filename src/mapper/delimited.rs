use crate::{
    key::RowKeyBuilder,
    mapper::{MalformedRecord, MapperError, PositionalLayout, RecordMapper},
    mutation::Mutation,
    record::{Record, RecordShape},
};

/// Field separator of Hive-style text exports.
pub const HIVE_DELIMITER: char = '\u{1}';

pub const CSV_DELIMITER: char = ',';

/// Maps delimited text lines with a fixed field count.
#[derive(Clone, Debug)]
pub struct DelimitedMapper {
    layout: PositionalLayout,
    delimiter: char,
    empty_as_null: bool,
}

impl DelimitedMapper {
    /// `width` fields per line, identity fields at the four `identity`
    /// positions. Splits on `,` until told otherwise.
    pub fn new(
        width: usize,
        identity: [usize; 4],
        key_builder: RowKeyBuilder,
    ) -> Result<Self, MapperError> {
        Ok(Self {
            layout: PositionalLayout::new(width, identity, key_builder)?,
            delimiter: CSV_DELIMITER,
            empty_as_null: false,
        })
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Treat empty fields as nulls, so they produce no cell.
    pub fn empty_as_null(mut self, empty_as_null: bool) -> Self {
        self.empty_as_null = empty_as_null;
        self
    }

    /// Use `names` as qualifiers instead of field ordinals.
    pub fn with_column_names<I, S>(mut self, names: I) -> Result<Self, MapperError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.layout = self.layout.with_column_names(names)?;
        Ok(self)
    }

    pub fn width(&self) -> usize {
        self.layout.width()
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn decode(&self, line: &str) -> Record {
        Record::from_delimited(line, self.delimiter, self.empty_as_null)
    }

    pub fn map_line(&self, line: &str) -> Result<Mutation, MalformedRecord> {
        self.map(&self.decode(line))
    }
}

impl RecordMapper for DelimitedMapper {
    fn shape(&self) -> RecordShape {
        RecordShape::Delimited
    }

    fn map(&self, record: &Record) -> Result<Mutation, MalformedRecord> {
        self.layout.map(record)
    }
}

#[cfg(test)]
mod tests {
    use super::{DelimitedMapper, HIVE_DELIMITER};
    use crate::{
        hash::digest,
        key::{RowKeyBuilder, SaltStrategy, ROW_KEY_WIDTH, SALT_WIDTH},
        mapper::{MalformedRecord, MapperError},
        mutation::{ordinal_qualifier, ColumnFamily},
    };

    fn mapper() -> DelimitedMapper {
        DelimitedMapper::new(4, [0, 1, 2, 3], RowKeyBuilder::default()).unwrap()
    }

    #[test]
    fn writes_every_field_by_ordinal() {
        let mutation = mapper().map_line("alice,bob,2020,active").unwrap();
        assert_eq!(mutation.key().len(), ROW_KEY_WIDTH);
        assert_eq!(mutation.len(), 4);
        assert_eq!(
            mutation.get(ColumnFamily::Current, &ordinal_qualifier(3)),
            Some(&b"active"[..])
        );
        assert_eq!(
            &mutation.key().digest_suffix()[..16],
            &digest(b"alice")[..]
        );
        assert!(mutation.key().salt().unwrap() < 40);
    }

    #[test]
    fn duplicate_records_share_digest_suffix() {
        let mapper =
            DelimitedMapper::new(4, [0, 1, 2, 3], RowKeyBuilder::new(40, SaltStrategy::WallClock))
                .unwrap();
        let first = mapper.map_line("alice,bob,2020,active").unwrap();
        let second = mapper.map_line("alice,bob,2020,active").unwrap();
        assert_eq!(
            first.key().as_bytes()[SALT_WIDTH..],
            second.key().as_bytes()[SALT_WIDTH..]
        );
    }

    #[test]
    fn wrong_field_count_is_malformed() {
        assert_eq!(
            mapper().map_line("alice,bob,2020").unwrap_err(),
            MalformedRecord::FieldCount {
                expected: 4,
                found: 3
            }
        );
    }

    #[test]
    fn null_fields_are_skipped() {
        let mapper = DelimitedMapper::new(5, [0, 1, 2, 4], RowKeyBuilder::default())
            .unwrap()
            .with_delimiter(HIVE_DELIMITER)
            .empty_as_null(true);
        let mutation = mapper
            .map_line("alice\u{1}bob\u{1}\u{1}x\u{1}y\n")
            .unwrap();
        assert_eq!(mutation.len(), 4);
        assert_eq!(mutation.get(ColumnFamily::Current, &ordinal_qualifier(2)), None);
        assert_eq!(
            &mutation.key().digest_suffix()[32..48],
            &digest(b"")[..]
        );
    }

    #[test]
    fn named_qualifiers() {
        let mapper = mapper()
            .with_column_names(["first", "second", "year", "status"])
            .unwrap();
        let mutation = mapper.map_line("alice,bob,2020,active").unwrap();
        assert_eq!(
            mutation.get(ColumnFamily::Current, b"year"),
            Some(&b"2020"[..])
        );
        assert_eq!(
            mapper.clone().with_column_names(["a"]).unwrap_err(),
            MapperError::ColumnNames { found: 1, width: 4 }
        );
    }

    #[test]
    fn rejects_identity_outside_width() {
        assert_eq!(
            DelimitedMapper::new(3, [0, 1, 2, 3], RowKeyBuilder::default()).unwrap_err(),
            MapperError::IdentityPosition {
                position: 3,
                width: 3
            }
        );
    }
}
