//! Row keys: a salt prefix followed by four identity-field digests.
//!
//! Keys order by plain byte comparison, which is the order the target store
//! uses for its partitions and files.
mod row;

pub use row::{
    RowKey, RowKeyBuilder, SaltSource, SaltStrategy, DEFAULT_REGION_COUNT, ROW_KEY_WIDTH,
    SALT_WIDTH,
};
