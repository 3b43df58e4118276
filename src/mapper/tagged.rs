use std::sync::Arc;

use crate::{
    key::RowKeyBuilder,
    mapper::{build_mutation, MalformedRecord, MapperError, RecordMapper},
    mutation::Mutation,
    record::{Record, RecordSchema, RecordShape},
};

/// Maps schema-tagged records; qualifiers are the schema's field names.
#[derive(Clone, Debug)]
pub struct TaggedMapper {
    schema: Arc<RecordSchema>,
    identity: [usize; 4],
    key_builder: RowKeyBuilder,
}

impl TaggedMapper {
    /// Resolve the four identity field names against `schema` once, up front.
    pub fn new(
        schema: Arc<RecordSchema>,
        identity: [&str; 4],
        key_builder: RowKeyBuilder,
    ) -> Result<Self, MapperError> {
        let mut positions = [0usize; 4];
        for (slot, name) in positions.iter_mut().zip(identity) {
            *slot = schema
                .position(name)
                .ok_or_else(|| MapperError::UnknownField(name.to_string()))?;
        }
        Ok(Self {
            schema,
            identity: positions,
            key_builder,
        })
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }
}

impl RecordMapper for TaggedMapper {
    fn shape(&self) -> RecordShape {
        RecordShape::SchemaTagged
    }

    fn map(&self, record: &Record) -> Result<Mutation, MalformedRecord> {
        match record.schema() {
            Some(schema) if schema.name() == self.schema.name() => {}
            other => {
                return Err(MalformedRecord::SchemaMismatch {
                    expected: self.schema.name().to_string(),
                    found: other
                        .map(|schema| schema.name().to_string())
                        .unwrap_or_else(|| "<untagged>".to_string()),
                })
            }
        }
        if record.width() != self.schema.width() {
            return Err(MalformedRecord::FieldCount {
                expected: self.schema.width(),
                found: record.width(),
            });
        }
        build_mutation(&self.key_builder, &self.identity, record, |position| {
            self.schema
                .field_name(position)
                .map(|name| name.as_bytes().to_vec())
                .unwrap_or_default()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::TaggedMapper;
    use crate::{
        hash::digest,
        key::RowKeyBuilder,
        mapper::{MalformedRecord, MapperError, RecordMapper},
        mutation::ColumnFamily,
        record::{Record, RecordSchema},
    };

    fn schema() -> Arc<RecordSchema> {
        Arc::new(RecordSchema::new(
            "account",
            ["id", "owner", "region", "year", "status"],
        ))
    }

    #[test]
    fn qualifiers_are_field_names() {
        let mapper = TaggedMapper::new(
            schema(),
            ["owner", "region", "year", "status"],
            RowKeyBuilder::default(),
        )
        .unwrap();
        let record = Record::tagged(
            schema(),
            vec![
                Some(b"42".to_vec()),
                Some(b"alice".to_vec()),
                None,
                Some(b"2020".to_vec()),
                Some(b"active".to_vec()),
            ],
        );

        let mutation = mapper.map(&record).unwrap();
        assert_eq!(mutation.len(), 4);
        assert_eq!(mutation.get(ColumnFamily::Current, b"id"), Some(&b"42"[..]));
        assert_eq!(mutation.get(ColumnFamily::Current, b"region"), None);
        assert_eq!(
            &mutation.key().digest_suffix()[..16],
            &digest(b"alice")[..]
        );
    }

    #[test]
    fn rejects_unknown_identity_field() {
        assert_eq!(
            TaggedMapper::new(
                schema(),
                ["owner", "nope", "year", "status"],
                RowKeyBuilder::default()
            )
            .unwrap_err(),
            MapperError::UnknownField("nope".to_string())
        );
    }

    #[test]
    fn untagged_record_is_malformed() {
        let mapper = TaggedMapper::new(
            schema(),
            ["owner", "region", "year", "status"],
            RowKeyBuilder::default(),
        )
        .unwrap();
        let record = Record::from_fields(["42", "alice", "eu", "2020", "active"]);
        assert!(matches!(
            mapper.map(&record),
            Err(MalformedRecord::SchemaMismatch { .. })
        ));
    }
}
