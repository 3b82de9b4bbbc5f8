// src/hash.rs

//! Content hashing for archive and metadata integrity
//!
//! SHA-256 is the primary digest; MD5 exists only because older channel
//! metadata carries nothing else. Verification failures surface as
//! [`Error::Integrity`] and are never retried by callers.

use crate::error::{Error, Result};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Streaming buffer size for file hashing (64 KB)
const HASH_BUFFER_SIZE: usize = 65536;

fn digest_file<D: Digest>(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = D::new();
    let mut buffer = [0u8; HASH_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 digest of a file, hex encoded
pub fn sha256_file(path: &Path) -> Result<String> {
    digest_file::<Sha256>(path)
}

/// MD5 digest of a file, hex encoded
pub fn md5_file(path: &Path) -> Result<String> {
    digest_file::<Md5>(path)
}

/// SHA-256 digest of a byte slice, hex encoded
pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Verify a file against an expected digest
///
/// `algorithm` is "sha256" or "md5" (as reported by
/// [`crate::record::PackageRecord::content_hash`]). Comparison is
/// case-insensitive on the hex form.
pub fn verify_file(path: &Path, algorithm: &str, expected: &str) -> Result<()> {
    let actual = match algorithm {
        "sha256" => sha256_file(path)?,
        "md5" => md5_file(path)?,
        other => {
            return Err(Error::Parse(format!("unknown hash algorithm '{other}'")));
        }
    };

    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(Error::Integrity {
            path: path.to_path_buf(),
            expected: expected.to_ascii_lowercase(),
            actual,
        })
    }
}
