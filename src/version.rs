//! Schema versioning utilities

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::LineageError;

/// A two-part schema version within a lineage, e.g. `0.1`
///
/// Ordering is lexicographic on `(major, minor)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion {
    pub major: u64,
    pub minor: u64,
}

/// Shorthand constructor for a [`SchemaVersion`]
pub const fn sv(major: u64, minor: u64) -> SchemaVersion {
    SchemaVersion::new(major, minor)
}

impl SchemaVersion {
    /// The first version of every lineage
    pub const ZERO: SchemaVersion = SchemaVersion::new(0, 0);

    pub const fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }

    /// Parse from a version string (e.g., "0.1" or "v0.1")
    pub fn parse(version_str: &str) -> Result<Self, LineageError> {
        let trimmed = version_str.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

        let (major, minor) = trimmed
            .split_once('.')
            .ok_or_else(|| LineageError::InvalidVersion(version_str.to_string()))?;

        let parse_part = |part: &str| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(LineageError::InvalidVersion(version_str.to_string()));
            }
            part.parse::<u64>()
                .map_err(|_| LineageError::InvalidVersion(version_str.to_string()))
        };

        Ok(Self::new(parse_part(major)?, parse_part(minor)?))
    }

    /// The next minor version, e.g. `0.1 -> 0.2`; saturates at `u64::MAX`
    pub fn next_minor(&self) -> Self {
        Self::new(self.major, self.minor.saturating_add(1))
    }

    /// The next major version, e.g. `0.3 -> 1.0`; saturates at `u64::MAX`
    pub fn next_major(&self) -> Self {
        Self::new(self.major.saturating_add(1), 0)
    }

    /// Whether `other` may directly follow this version in a lineage
    pub fn is_successor(&self, other: &SchemaVersion) -> bool {
        let minor = other.major == self.major && self.minor.checked_add(1) == Some(other.minor);
        let major = other.minor == 0 && self.major.checked_add(1) == Some(other.major);
        minor || major
    }

    /// Check if this is a minor version bump from another version
    pub fn is_minor_bump_from(&self, other: &SchemaVersion) -> bool {
        self.major == other.major && self.minor > other.minor
    }

    /// Check if this is a major version bump from another version
    pub fn is_major_bump_from(&self, other: &SchemaVersion) -> bool {
        self.major > other.major
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for SchemaVersion {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for SchemaVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SchemaVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
