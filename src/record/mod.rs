//! Decoded input records.
//!
//! Parsing each input encoding is the caller's job; this module only models
//! the decoded result: an ordered list of nullable byte values, optionally
//! described by a [`RecordSchema`] for schema-tagged inputs.
mod schema;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use schema::RecordSchema;

/// Input shapes a mapper can consume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordShape {
    /// One text line split on a delimiter.
    Delimited,
    /// One row of a columnar row group, addressed by position.
    Columnar,
    /// Named fields described by a schema descriptor.
    SchemaTagged,
}

/// One decoded input record. `None` marks an absent/null field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    values: Vec<Option<Vec<u8>>>,
    schema: Option<Arc<RecordSchema>>,
}

impl Record {
    /// Positional record with explicit nulls.
    pub fn positional(values: Vec<Option<Vec<u8>>>) -> Self {
        Self {
            values,
            schema: None,
        }
    }

    /// Positional record where every field is present.
    pub fn from_fields<I, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: AsRef<[u8]>,
    {
        Self::positional(
            fields
                .into_iter()
                .map(|value| Some(value.as_ref().to_vec()))
                .collect(),
        )
    }

    /// Record whose fields are named by `schema`, in schema order.
    pub fn tagged(schema: Arc<RecordSchema>, values: Vec<Option<Vec<u8>>>) -> Self {
        Self {
            values,
            schema: Some(schema),
        }
    }

    /// Split a text line on `delimiter`. With `empty_as_null` set, empty
    /// fields become nulls instead of empty values.
    pub fn from_delimited(line: &str, delimiter: char, empty_as_null: bool) -> Self {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        Self::positional(
            line.split(delimiter)
                .map(|field| {
                    if empty_as_null && field.is_empty() {
                        None
                    } else {
                        Some(field.as_bytes().to_vec())
                    }
                })
                .collect(),
        )
    }

    /// Number of fields, nulls included.
    pub fn width(&self) -> usize {
        self.values.len()
    }

    /// Value at `position`; `None` when null or out of range.
    pub fn get(&self, position: usize) -> Option<&[u8]> {
        self.values.get(position).and_then(|value| value.as_deref())
    }

    /// Iterate `(position, value)` pairs, nulls included.
    pub fn iter(&self) -> impl Iterator<Item = (usize, Option<&[u8]>)> {
        self.values
            .iter()
            .enumerate()
            .map(|(position, value)| (position, value.as_deref()))
    }

    pub fn schema(&self) -> Option<&Arc<RecordSchema>> {
        self.schema.as_ref()
    }

    /// Field name at `position`, when the record carries a schema.
    pub fn name(&self, position: usize) -> Option<&str> {
        self.schema.as_ref()?.field_name(position)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Record, RecordSchema};

    #[test]
    fn delimited_split_keeps_empty_fields() {
        let record = Record::from_delimited("a,,c\n", ',', false);
        assert_eq!(record.width(), 3);
        assert_eq!(record.get(0), Some(&b"a"[..]));
        assert_eq!(record.get(1), Some(&b""[..]));
        assert_eq!(record.get(2), Some(&b"c"[..]));
    }

    #[test]
    fn delimited_split_empty_as_null() {
        let record = Record::from_delimited("a\u{1}\u{1}c\r\n", '\u{1}', true);
        assert_eq!(record.width(), 3);
        assert_eq!(record.get(1), None);
        assert_eq!(record.get(2), Some(&b"c"[..]));
    }

    #[test]
    fn tagged_names_follow_schema() {
        let schema = Arc::new(RecordSchema::new("user", ["id", "name"]));
        let record = Record::tagged(schema, vec![Some(b"1".to_vec()), None]);
        assert_eq!(record.name(0), Some("id"));
        assert_eq!(record.name(1), Some("name"));
        assert_eq!(record.get(1), None);
        assert_eq!(record.name(2), None);
    }
}
