//! Fixed-width field digests used by row key construction.

use md5::{Digest as _, Md5};

/// Width in bytes of a field digest.
pub const DIGEST_LENGTH: usize = 16;

/// 16-byte MD5 digest of a field value.
pub type Digest = [u8; DIGEST_LENGTH];

/// Digest `bytes`. Deterministic; only used to spread keys, never for security.
pub fn digest(bytes: &[u8]) -> Digest {
    let mut out = [0u8; DIGEST_LENGTH];
    out.copy_from_slice(&Md5::digest(bytes));
    out
}

/// Digest several byte strings as if they were concatenated.
pub(crate) fn digest_all<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> Digest {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; DIGEST_LENGTH];
    out.copy_from_slice(&hasher.finalize());
    out
}
