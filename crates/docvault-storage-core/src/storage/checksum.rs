//! SHA-256 content checksums.

use sha2::{Digest, Sha256};

use crate::error::StorageError;
use crate::{Error, Result};

/// Metadata key under which backends store the content checksum.
pub const CHECKSUM_METADATA_KEY: &str = "sha256";

/// Hex-encoded SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compare `data` against a backend-reported checksum.
pub fn verify(path: &str, expected: &str, data: &[u8]) -> Result<()> {
    let actual = sha256_hex(data);
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(Error::Storage(StorageError::Integrity(format!(
            "{}: expected sha256 {}, got {}",
            path, expected, actual
        ))))
    }
}
