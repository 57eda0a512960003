//! Validated storage references.

use crate::MAX_STORAGE_REF_LEN;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque identifier naming a blob across storage tiers.
///
/// A storage reference is the join key between the file catalog and the
/// on-disk tiers. References ultimately touch untrusted flows (they become
/// path components), so parsing enforces a strict allow-list before any
/// path is ever built from one. This is a security requirement, not an
/// optimization.
///
/// Valid references consist of one or more `/`-separated segments, each
/// made of `[A-Za-z0-9._-]`, where no segment is empty, `.`, or `..`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageRef(String);

impl StorageRef {
    /// Parse and validate a storage reference.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() {
            return Err(crate::Error::InvalidStorageRef("empty".to_string()));
        }
        if s.len() > MAX_STORAGE_REF_LEN {
            return Err(crate::Error::InvalidStorageRef(format!(
                "exceeds {} bytes",
                MAX_STORAGE_REF_LEN
            )));
        }
        // Fast rejection of the usual traversal shapes before segment checks.
        if s.starts_with('/') || s.ends_with('/') || s.contains("//") || s.contains('\\') {
            return Err(crate::Error::InvalidStorageRef(format!(
                "malformed separator in: {s}"
            )));
        }
        for segment in s.split('/') {
            if segment == "." || segment == ".." {
                return Err(crate::Error::InvalidStorageRef(format!(
                    "path traversal not allowed: {s}"
                )));
            }
            if !segment
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
            {
                return Err(crate::Error::InvalidStorageRef(format!(
                    "disallowed character in segment: {segment}"
                )));
            }
        }
        Ok(Self(s.to_string()))
    }

    /// Get the reference as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StorageRef {
    type Error = crate::Error;

    fn try_from(s: String) -> crate::Result<Self> {
        Self::parse(&s)
    }
}

impl From<StorageRef> for String {
    fn from(r: StorageRef) -> String {
        r.0
    }
}

impl fmt::Debug for StorageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageRef({})", self.0)
    }
}

impl fmt::Display for StorageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
