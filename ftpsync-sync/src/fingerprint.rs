//! Content fingerprints.
//!
//! A [`Fingerprint`] is the SHA-256 of a file's full content followed by its
//! byte count as 8 little-endian bytes. Content is streamed through a fixed
//! buffer, so memory use does not grow with file size. Symbolic links are
//! followed: the fingerprint describes the target's content.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{io_err, SyncError};

const READ_BUF_SIZE: usize = 64 * 1024;

/// Lowercase hex SHA-256 digest identifying one content state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Fingerprint {
    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

/// Result of fingerprinting one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprinted {
    /// Bytes actually read.
    pub size: u64,
    pub fingerprint: Fingerprint,
}

/// Stream `path` and compute its fingerprint.
///
/// Fails with [`SyncError::Io`] when the file cannot be opened or read
/// (permissions, or it vanished after being listed).
pub fn fingerprint(path: &Path) -> Result<Fingerprinted, SyncError> {
    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut size: u64 = 0;
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_err(path, e)),
        };
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    hasher.update(size.to_le_bytes());
    Ok(Fingerprinted {
        size,
        fingerprint: Fingerprint(hex::encode(hasher.finalize())),
    })
}
