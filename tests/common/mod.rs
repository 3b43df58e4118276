//! Shared helpers for the bulk load integration tests.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bulkload::{
    mapper::DelimitedMapper, Adoption, LoadOption, LocalPartitionStore, PartitionId,
    PartitionStore, Record, RowKeyBuilder, SaltStrategy, StagedFile, StoreError,
};

pub const REGIONS: u32 = 8;

pub fn option(root: &Path) -> Arc<LoadOption> {
    Arc::new(
        LoadOption::new("events", root.join("staging"))
            .region_count(REGIONS)
            .batch_rows(16),
    )
}

pub fn csv_mapper() -> DelimitedMapper {
    DelimitedMapper::new(
        5,
        [0, 1, 2, 3],
        RowKeyBuilder::new(REGIONS, SaltStrategy::Identity),
    )
    .unwrap()
}

fn gen_string(rng: &mut fastrand::Rng, len: usize) -> String {
    (0..len).map(|_| rng.alphanumeric()).collect()
}

/// `count` csv lines over a small identity domain so that some rows repeat.
pub fn gen_lines(rng: &mut fastrand::Rng, count: usize) -> Vec<String> {
    (0..count)
        .map(|_| {
            format!(
                "user{},{},{},{},{}",
                rng.u8(0..32),
                ["eu", "us", "ap"][rng.usize(0..3)],
                rng.u16(2000..2004),
                ["open", "closed"][rng.usize(0..2)],
                gen_string(rng, 12),
            )
        })
        .collect()
}

pub fn decode(mapper: &DelimitedMapper, lines: &[String]) -> Vec<Record> {
    lines.iter().map(|line| mapper.decode(line)).collect()
}

/// Fails every adoption into one partition while `failing` is set.
pub struct FlakyStore {
    pub inner: Arc<LocalPartitionStore>,
    pub partition: PartitionId,
    pub failing: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<LocalPartitionStore>, partition: PartitionId) -> Self {
        Self {
            inner,
            partition,
            failing: AtomicBool::new(true),
        }
    }

    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }
}

impl PartitionStore for FlakyStore {
    async fn adopt(&self, partition: PartitionId, file: &StagedFile) -> Result<Adoption, StoreError> {
        if partition == self.partition && self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("region server offline")));
        }
        self.inner.adopt(partition, file).await
    }
}
