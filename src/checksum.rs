//! Declaration checksums
//!
//! A lineage remembers the SHA-256 of the bytes it was assembled from, so a
//! deployment can pin a declaration and detect when it changes underneath.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::LineageError;

const HEX_LEN: usize = 64;

/// Lowercase hex SHA-256 digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

impl Checksum {
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(data)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }

    pub fn verify(&self, data: &[u8]) -> bool {
        Self::from_bytes(data) == *self
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Checksum {
    type Err = LineageError;

    /// Accepts a 64-digit hex digest in either case, optionally prefixed with `sha256:`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digest = s.trim().trim_start_matches("sha256:");
        if digest.len() != HEX_LEN || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(LineageError::InvalidFormat(format!(
                "checksum must be {HEX_LEN} hex digits, got '{s}'"
            )));
        }
        Ok(Self(digest.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for Checksum {
    type Error = LineageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Checksum> for String {
    fn from(checksum: Checksum) -> Self {
        checksum.0
    }
}
