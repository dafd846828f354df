//! Hashing - stage script digests for build reports

use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SHA-256 of a file's contents, same output as `sha256sum`
pub fn file_sha256(path: &Path) -> std::io::Result<String> {
    Ok(sha256_hex(&fs::read(path)?))
}
