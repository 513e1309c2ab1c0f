//! Content digests.
//!
//! Only `sha256` is written; any digest read back from a catalog or manifest
//! is validated before it is turned into a path so a hostile document cannot
//! point outside the blob directory.

use a3s_artifact_core::error::{ArtifactError, Result};
use sha2::{Digest, Sha256};

/// Algorithm prefix used for every digest the store writes.
pub const SHA256_PREFIX: &str = "sha256:";

/// Compute the `sha256:<hex>` digest of raw bytes.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("{}{}", SHA256_PREFIX, hex::encode(Sha256::digest(data)))
}

/// Split a digest into `(algorithm, hex)` after validating it.
pub fn split_digest(digest: &str) -> Result<(&str, &str)> {
    let (algorithm, encoded) = digest
        .split_once(':')
        .ok_or_else(|| ArtifactError::malformed("digest", format!("'{}' has no algorithm", digest)))?;

    if algorithm != "sha256" {
        return Err(ArtifactError::malformed(
            "digest",
            format!("unsupported algorithm '{}' in '{}'", algorithm, digest),
        ));
    }
    if encoded.len() != 64
        || !encoded
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(ArtifactError::malformed(
            "digest",
            format!("'{}' is not a lowercase sha256 hex digest", digest),
        ));
    }
    Ok((algorithm, encoded))
}

/// Incremental digest over a byte stream.
#[derive(Default)]
pub struct DigestWriter {
    hasher: Sha256,
    size: u64,
}

impl DigestWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
    }

    /// Finish, returning `(digest, size)`.
    pub fn finish(self) -> (String, u64) {
        (
            format!("{}{}", SHA256_PREFIX, hex::encode(self.hasher.finalize())),
            self.size,
        )
    }
}
