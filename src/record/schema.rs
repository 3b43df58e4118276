use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Descriptor for schema-tagged records: a record name plus ordered field
/// names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    name: String,
    fields: Vec<Arc<str>>,
}

impl RecordSchema {
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            fields: fields
                .into_iter()
                .map(|field| Arc::from(field.as_ref()))
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> usize {
        self.fields.len()
    }

    pub fn field_name(&self, position: usize) -> Option<&str> {
        self.fields.get(position).map(|field| field.as_ref())
    }

    /// Position of the field called `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.as_ref() == name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.as_ref())
    }
}
