use std::{
    borrow::Borrow,
    fmt,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::hash::{digest, digest_all, Digest, DIGEST_LENGTH};

/// Width of the salt prefix in bytes.
pub const SALT_WIDTH: usize = 2;

/// Width of every row key produced by [`RowKeyBuilder`].
pub const ROW_KEY_WIDTH: usize = SALT_WIDTH + 4 * DIGEST_LENGTH;

/// Expected number of store partitions when nothing else is configured.
pub const DEFAULT_REGION_COUNT: u32 = 40;

/// Row key bytes as stored in the target store.
///
/// Keys built by [`RowKeyBuilder`] are always [`ROW_KEY_WIDTH`] bytes long;
/// keys read back from staged files are taken as-is.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey(Arc<[u8]>);

impl RowKey {
    /// Wrap raw key bytes without interpreting them.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        RowKey(Arc::from(bytes.as_ref()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Salt prefix, if the key is at least [`SALT_WIDTH`] bytes long.
    pub fn salt(&self) -> Option<u16> {
        let prefix = self.0.get(..SALT_WIDTH)?;
        Some(u16::from_be_bytes([prefix[0], prefix[1]]))
    }

    /// Everything after the salt: the concatenated identity digests.
    pub fn digest_suffix(&self) -> &[u8] {
        self.0.get(SALT_WIDTH..).unwrap_or_default()
    }
}

impl AsRef<[u8]> for RowKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Borrow<[u8]> for RowKey {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowKey({})", hex::encode(&self.0))
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// How the salt prefix is derived.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaltStrategy {
    /// Salt from a digest of the identity fields. Reprocessing a record yields
    /// the same key, so retries overwrite instead of adding rows.
    #[default]
    Identity,
    /// Salt from the wall clock at key construction time. Reloading the same
    /// record lands in a fresh row, one per load.
    WallClock,
}

/// Input to the salt distribution function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaltSource {
    /// Digest over the identity fields.
    Identity(Digest),
    /// Milliseconds since the Unix epoch.
    WallClock(u64),
}

impl SaltSource {
    fn distribute(&self) -> u64 {
        match self {
            SaltSource::Identity(digest) => {
                let mut head = [0u8; 8];
                head.copy_from_slice(&digest[..8]);
                u64::from_be_bytes(head)
            }
            SaltSource::WallClock(millis) => *millis,
        }
    }
}

/// Builds fixed-width salted row keys from four identity fields.
#[derive(Clone, Copy, Debug)]
pub struct RowKeyBuilder {
    region_count: u32,
    strategy: SaltStrategy,
}

impl RowKeyBuilder {
    /// `region_count` is clamped into `1..=65536` so every salt fits the
    /// 2-byte prefix.
    pub fn new(region_count: u32, strategy: SaltStrategy) -> Self {
        Self {
            region_count: region_count.clamp(1, u16::MAX as u32 + 1),
            strategy,
        }
    }

    pub fn region_count(&self) -> u32 {
        self.region_count
    }

    pub fn strategy(&self) -> SaltStrategy {
        self.strategy
    }

    /// Resolve the salt source from the configured strategy and build the key.
    pub fn key(&self, f1: &[u8], f2: &[u8], f3: &[u8], f4: &[u8]) -> RowKey {
        let digests = [digest(f1), digest(f2), digest(f3), digest(f4)];
        let source = match self.strategy {
            SaltStrategy::Identity => {
                SaltSource::Identity(digest_all(digests.iter().map(|d| &d[..])))
            }
            SaltStrategy::WallClock => SaltSource::WallClock(now_millis()),
        };
        self.assemble(source, &digests)
    }

    /// `salt(2 bytes) ‖ digest(f1) ‖ digest(f2) ‖ digest(f3) ‖ digest(f4)`.
    pub fn build(
        &self,
        source: SaltSource,
        f1: &[u8],
        f2: &[u8],
        f3: &[u8],
        f4: &[u8],
    ) -> RowKey {
        self.assemble(source, &[digest(f1), digest(f2), digest(f3), digest(f4)])
    }

    /// Salt value for `source`, in `[0, region_count)`.
    pub fn salt(&self, source: SaltSource) -> u16 {
        (source.distribute() % u64::from(self.region_count)) as u16
    }

    fn assemble(&self, source: SaltSource, digests: &[Digest; 4]) -> RowKey {
        let mut bytes = Vec::with_capacity(ROW_KEY_WIDTH);
        bytes.extend_from_slice(&self.salt(source).to_be_bytes());
        for digest in digests {
            bytes.extend_from_slice(digest);
        }
        debug_assert_eq!(bytes.len(), ROW_KEY_WIDTH);
        RowKey(Arc::from(bytes))
    }
}

impl Default for RowKeyBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_REGION_COUNT, SaltStrategy::default())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{RowKeyBuilder, SaltSource, SaltStrategy, ROW_KEY_WIDTH, SALT_WIDTH};
    use crate::hash::digest;

    #[test]
    fn width_is_constant() {
        let builder = RowKeyBuilder::default();
        let long = vec![b'x'; 4096];
        let inputs: [[&[u8]; 4]; 3] = [
            [b"", b"", b"", b""],
            [b"a", b"bb", b"ccc", b"dddd"],
            [long.as_slice(), b"", long.as_slice(), b"1"],
        ];
        for [f1, f2, f3, f4] in inputs {
            assert_eq!(builder.key(f1, f2, f3, f4).len(), ROW_KEY_WIDTH);
            assert_eq!(
                builder
                    .build(SaltSource::WallClock(7), f1, f2, f3, f4)
                    .len(),
                ROW_KEY_WIDTH
            );
        }
        assert_eq!(ROW_KEY_WIDTH, 66);
    }

    #[test]
    fn layout_is_salt_then_digests() {
        let builder = RowKeyBuilder::new(40, SaltStrategy::WallClock);
        let key = builder.build(
            SaltSource::WallClock(83),
            b"alice",
            b"bob",
            b"2020",
            b"active",
        );

        assert_eq!(key.salt(), Some(3));
        assert_eq!(&key.as_bytes()[..SALT_WIDTH], &[0, 3]);
        let suffix = key.digest_suffix();
        assert_eq!(&suffix[..16], &digest(b"alice"));
        assert_eq!(&suffix[16..32], &digest(b"bob"));
        assert_eq!(&suffix[32..48], &digest(b"2020"));
        assert_eq!(&suffix[48..], &digest(b"active"));
    }

    #[test]
    fn identity_salt_is_deterministic() {
        let builder = RowKeyBuilder::new(40, SaltStrategy::Identity);
        let a = builder.key(b"alice", b"bob", b"2020", b"active");
        let b = builder.key(b"alice", b"bob", b"2020", b"active");
        assert_eq!(a, b);
    }

    #[test]
    fn wall_clock_salt_keeps_digest_suffix() {
        let builder = RowKeyBuilder::new(40, SaltStrategy::WallClock);
        let a = builder.key(b"alice", b"bob", b"2020", b"active");
        let b = builder.key(b"alice", b"bob", b"2020", b"active");
        assert_eq!(a.digest_suffix(), b.digest_suffix());
        assert!(a.salt().unwrap() < 40);
        assert!(b.salt().unwrap() < 40);
    }

    #[test]
    fn salt_spreads_evenly() {
        const REGIONS: u32 = 40;
        const SAMPLES: usize = 40_000;

        let builder = RowKeyBuilder::new(REGIONS, SaltStrategy::Identity);
        let mut counts = vec![0usize; REGIONS as usize];
        for i in 0..SAMPLES {
            let id = i.to_string();
            let key = builder.key(id.as_bytes(), b"tenant", b"2020", b"active");
            counts[key.salt().unwrap() as usize] += 1;
        }
        let expected = SAMPLES / REGIONS as usize;
        for (salt, count) in counts.iter().enumerate() {
            assert!(
                count * 4 > expected * 3 && count * 4 < expected * 5,
                "salt {salt} got {count} keys, expected about {expected}"
            );
        }
    }

    #[test]
    fn region_count_is_clamped() {
        assert_eq!(RowKeyBuilder::new(0, SaltStrategy::Identity).region_count(), 1);
        assert_eq!(
            RowKeyBuilder::new(u32::MAX, SaltStrategy::Identity).region_count(),
            65_536
        );
        let single = RowKeyBuilder::new(1, SaltStrategy::Identity);
        assert_eq!(single.key(b"a", b"b", b"c", b"d").salt(), Some(0));
    }
}
