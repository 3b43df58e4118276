//! Partition boundaries of the target store and the locator seam that
//! supplies them.

use std::{fmt, future::Future, io, sync::Arc};

use thiserror::Error;

use crate::key::SALT_WIDTH;

/// Position of a partition inside one [`PartitionBoundary`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId(u32);

impl PartitionId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key range owned by one partition: `[start, end)`, `end = None` meaning
/// unbounded above.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionRange<'a> {
    pub id: PartitionId,
    pub start: &'a [u8],
    pub end: Option<&'a [u8]>,
}

impl PartitionRange<'_> {
    pub fn contains(&self, key: &[u8]) -> bool {
        self.start <= key && self.end.map_or(true, |end| key < end)
    }

    /// Whether the whole closed range `[min, max]` lies inside this partition.
    pub fn covers(&self, min: &[u8], max: &[u8]) -> bool {
        self.contains(min) && self.contains(max)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BoundaryError {
    #[error("partition start keys must be strictly increasing (at index {index})")]
    Unordered { index: usize },
    #[error("split key {0} is already a partition start key")]
    DuplicateSplit(String),
    #[error("partition {0} does not exist")]
    UnknownPartition(PartitionId),
    #[error("the first partition cannot be merged into a predecessor")]
    MergeFirst,
}

/// Ordered partition start keys. Partition `i` owns `[start[i], start[i + 1])`
/// and the last partition is unbounded above; keys below `start[0]` belong to
/// no partition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartitionBoundary {
    start_keys: Vec<Vec<u8>>,
}

impl PartitionBoundary {
    pub fn new<I, K>(start_keys: I) -> Result<Self, BoundaryError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        let start_keys: Vec<Vec<u8>> = start_keys
            .into_iter()
            .map(|key| key.as_ref().to_vec())
            .collect();
        if let Some(index) = start_keys
            .windows(2)
            .position(|pair| pair[0] >= pair[1])
        {
            return Err(BoundaryError::Unordered { index: index + 1 });
        }
        Ok(Self { start_keys })
    }

    /// `n` split points give `n + 1` partitions covering the whole key space.
    pub fn from_split_points<I, K>(points: I) -> Result<Self, BoundaryError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        let mut start_keys = vec![Vec::new()];
        start_keys.extend(points.into_iter().map(|key| key.as_ref().to_vec()));
        Self::new(start_keys)
    }

    /// One partition per salt value, as for a table pre-split for salted keys.
    pub fn salted(region_count: u32) -> Self {
        let region_count = region_count.clamp(1, u16::MAX as u32 + 1);
        let start_keys = (0..region_count)
            .map(|salt| {
                if salt == 0 {
                    Vec::new()
                } else {
                    let mut key = Vec::with_capacity(SALT_WIDTH);
                    key.extend_from_slice(&(salt as u16).to_be_bytes());
                    key
                }
            })
            .collect();
        Self { start_keys }
    }

    pub fn len(&self) -> usize {
        self.start_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.start_keys.is_empty()
    }

    pub fn start_keys(&self) -> &[Vec<u8>] {
        &self.start_keys
    }

    pub fn range(&self, id: PartitionId) -> Option<PartitionRange<'_>> {
        let start = self.start_keys.get(id.index())?;
        Some(PartitionRange {
            id,
            start,
            end: self
                .start_keys
                .get(id.index() + 1)
                .map(|end| end.as_slice()),
        })
    }

    pub fn ranges(&self) -> impl Iterator<Item = PartitionRange<'_>> {
        (0..self.start_keys.len()).filter_map(|index| self.range(PartitionId(index as u32)))
    }

    /// Partition owning `key`.
    pub fn locate(&self, key: &[u8]) -> Option<PartitionId> {
        match self
            .start_keys
            .binary_search_by(|start| start.as_slice().cmp(key))
        {
            Ok(index) => Some(PartitionId(index as u32)),
            Err(0) => None,
            Err(index) => Some(PartitionId(index as u32 - 1)),
        }
    }

    /// First and last partitions touched by the closed range `[min, max]`;
    /// `None` when `min` is owned by no partition.
    pub fn locate_range(&self, min: &[u8], max: &[u8]) -> Option<(PartitionId, PartitionId)> {
        let first = self.locate(min)?;
        let last = self.locate(max)?;
        Some((first, last))
    }

    /// Split the partition containing `key` so that a new partition starts at
    /// `key`.
    pub fn split_at(&mut self, key: &[u8]) -> Result<(), BoundaryError> {
        match self
            .start_keys
            .binary_search_by(|start| start.as_slice().cmp(key))
        {
            Ok(_) => Err(BoundaryError::DuplicateSplit(hex::encode(key))),
            Err(index) => {
                self.start_keys.insert(index, key.to_vec());
                Ok(())
            }
        }
    }

    /// Merge partition `id` into its predecessor.
    pub fn merge_into_previous(&mut self, id: PartitionId) -> Result<(), BoundaryError> {
        if id.index() >= self.start_keys.len() {
            return Err(BoundaryError::UnknownPartition(id));
        }
        if id.index() == 0 {
            return Err(BoundaryError::MergeFirst);
        }
        self.start_keys.remove(id.index());
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("partition locator unavailable: {0}")]
    Unavailable(String),
    #[error("partition locator boundary error: {0}")]
    Boundary(#[from] BoundaryError),
    #[error("partition locator io error: {0}")]
    Io(#[from] io::Error),
}

/// Source of the target store's current partition boundaries.
pub trait PartitionLocator {
    fn partitions(&self) -> impl Future<Output = Result<PartitionBoundary, LocatorError>> + Send;
}

impl<T> PartitionLocator for Arc<T>
where
    T: PartitionLocator,
{
    fn partitions(&self) -> impl Future<Output = Result<PartitionBoundary, LocatorError>> + Send {
        T::partitions(self)
    }
}

/// Locator over a fixed boundary set.
#[derive(Clone, Debug)]
pub struct StaticLocator {
    boundary: PartitionBoundary,
}

impl StaticLocator {
    pub fn new(boundary: PartitionBoundary) -> Self {
        Self { boundary }
    }
}

impl PartitionLocator for StaticLocator {
    async fn partitions(&self) -> Result<PartitionBoundary, LocatorError> {
        Ok(self.boundary.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::{BoundaryError, PartitionBoundary, PartitionId};

    #[test]
    fn locate_by_start_keys() {
        let boundary = PartitionBoundary::new(["m", "z"]).unwrap();
        assert_eq!(boundary.len(), 2);
        assert_eq!(boundary.locate(b"a"), None);
        assert_eq!(boundary.locate(b"m"), Some(PartitionId::new(0)));
        assert_eq!(boundary.locate(b"yyy"), Some(PartitionId::new(0)));
        assert_eq!(boundary.locate(b"z"), Some(PartitionId::new(1)));
        assert_eq!(boundary.locate(b"zzzz"), Some(PartitionId::new(1)));

        let first = boundary.range(PartitionId::new(0)).unwrap();
        assert!(first.covers(b"n", b"y"));
        assert!(!first.covers(b"n", b"za"));
        assert_eq!(boundary.range(PartitionId::new(1)).unwrap().end, None);
    }

    #[test]
    fn split_points_cover_everything() {
        let boundary = PartitionBoundary::from_split_points(["m", "z"]).unwrap();
        assert_eq!(boundary.len(), 3);
        assert_eq!(boundary.locate(b""), Some(PartitionId::new(0)));
        assert_eq!(
            boundary.locate_range(b"a", b"n"),
            Some((PartitionId::new(0), PartitionId::new(1)))
        );
    }

    #[test]
    fn rejects_unordered_keys() {
        assert_eq!(
            PartitionBoundary::new(["b", "a"]),
            Err(BoundaryError::Unordered { index: 1 })
        );
        assert!(PartitionBoundary::new(["a", "a"]).is_err());
    }

    #[test]
    fn salted_partitions_follow_salt_prefix() {
        let boundary = PartitionBoundary::salted(40);
        assert_eq!(boundary.len(), 40);
        assert_eq!(boundary.locate(&[0, 0, 0xff]), Some(PartitionId::new(0)));
        assert_eq!(boundary.locate(&[0, 7, 0x00]), Some(PartitionId::new(7)));
        assert_eq!(boundary.locate(&[0, 39, 0xff]), Some(PartitionId::new(39)));
    }

    #[test]
    fn split_and_merge() {
        let mut boundary = PartitionBoundary::from_split_points(["m"]).unwrap();
        boundary.split_at(b"t").unwrap();
        assert_eq!(boundary.len(), 3);
        assert_eq!(boundary.locate(b"u"), Some(PartitionId::new(2)));
        assert!(matches!(
            boundary.split_at(b"t"),
            Err(BoundaryError::DuplicateSplit(_))
        ));

        boundary.merge_into_previous(PartitionId::new(1)).unwrap();
        assert_eq!(boundary.start_keys(), &[b"".to_vec(), b"t".to_vec()]);
        assert_eq!(
            boundary.merge_into_previous(PartitionId::new(0)),
            Err(BoundaryError::MergeFirst)
        );
    }
}
