use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::key::RowKey;

/// Column families a bulk load can write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ColumnFamily {
    /// Latest value of each field. The only family mappers populate.
    Current,
    /// Reserved for prior values.
    History,
}

/// On-disk names of the column families.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Families {
    pub current: Arc<str>,
    pub history: Arc<str>,
}

impl Families {
    pub fn new(current: impl AsRef<str>, history: impl AsRef<str>) -> Self {
        Self {
            current: Arc::from(current.as_ref()),
            history: Arc::from(history.as_ref()),
        }
    }

    pub fn name(&self, family: ColumnFamily) -> &str {
        match family {
            ColumnFamily::Current => &self.current,
            ColumnFamily::History => &self.history,
        }
    }

    pub fn resolve(&self, name: &str) -> Option<ColumnFamily> {
        if name == &*self.current {
            Some(ColumnFamily::Current)
        } else if name == &*self.history {
            Some(ColumnFamily::History)
        } else {
            None
        }
    }
}

impl Default for Families {
    fn default() -> Self {
        Self::new("c", "h")
    }
}

/// Qualifier for the field at `position`: its ordinal as a 4-byte big-endian
/// integer.
pub fn ordinal_qualifier(position: usize) -> Vec<u8> {
    (position as i32).to_be_bytes().to_vec()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cell {
    pub family: ColumnFamily,
    pub qualifier: Vec<u8>,
    pub value: Vec<u8>,
}

/// Row key plus the cells to write under it. Built once by a mapper and never
/// changed afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct Mutation {
    key: RowKey,
    cells: Vec<Cell>,
}

impl Mutation {
    pub fn new(key: RowKey) -> Self {
        Self {
            key,
            cells: Vec::new(),
        }
    }

    /// Add a cell, keeping cells in (family, qualifier) order; a later value
    /// for the same column replaces the earlier one.
    pub fn put(&mut self, family: ColumnFamily, qualifier: Vec<u8>, value: Vec<u8>) {
        match self.position(family, &qualifier) {
            Ok(index) => self.cells[index].value = value,
            Err(index) => self.cells.insert(
                index,
                Cell {
                    family,
                    qualifier,
                    value,
                },
            ),
        }
    }

    pub fn key(&self) -> &RowKey {
        &self.key
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, family: ColumnFamily, qualifier: &[u8]) -> Option<&[u8]> {
        self.position(family, qualifier)
            .ok()
            .map(|index| self.cells[index].value.as_slice())
    }

    fn position(&self, family: ColumnFamily, qualifier: &[u8]) -> Result<usize, usize> {
        self.cells.binary_search_by(|cell| {
            (cell.family, cell.qualifier.as_slice()).cmp(&(family, qualifier))
        })
    }

    pub fn into_parts(self) -> (RowKey, Vec<Cell>) {
        (self.key, self.cells)
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("key", &self.key)
            .field("cells", &self.cells.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{ordinal_qualifier, ColumnFamily, Families, Mutation};
    use crate::key::RowKey;

    #[test]
    fn put_replaces_same_column() {
        let mut mutation = Mutation::new(RowKey::from_bytes(b"k"));
        mutation.put(ColumnFamily::Current, b"q".to_vec(), b"1".to_vec());
        mutation.put(ColumnFamily::History, b"q".to_vec(), b"old".to_vec());
        mutation.put(ColumnFamily::Current, b"q".to_vec(), b"2".to_vec());

        mutation.put(ColumnFamily::Current, b"a".to_vec(), b"3".to_vec());

        assert_eq!(mutation.len(), 3);
        assert_eq!(mutation.cells()[0].qualifier, b"a".to_vec());
        assert_eq!(mutation.cells()[2].family, ColumnFamily::History);
        assert_eq!(mutation.get(ColumnFamily::Current, b"q"), Some(&b"2"[..]));
        assert_eq!(mutation.get(ColumnFamily::History, b"q"), Some(&b"old"[..]));
    }

    #[test]
    fn ordinal_qualifier_is_big_endian_i32() {
        assert_eq!(ordinal_qualifier(0), vec![0, 0, 0, 0]);
        assert_eq!(ordinal_qualifier(20), vec![0, 0, 0, 20]);
        assert_eq!(ordinal_qualifier(256), vec![0, 0, 1, 0]);
    }

    #[test]
    fn family_names_resolve() {
        let families = Families::default();
        assert_eq!(families.name(ColumnFamily::Current), "c");
        assert_eq!(families.resolve("h"), Some(ColumnFamily::History));
        assert_eq!(families.resolve("x"), None);
    }
}
