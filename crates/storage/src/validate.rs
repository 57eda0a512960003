//! File legitimacy validation against the catalog.
//!
//! A whitelist is a point-in-time snapshot of the catalog's non-deleted
//! records. Each batch pass loads its own snapshot and judges every file
//! against it, so a pass is internally consistent even while the catalog
//! moves underneath it.

use crate::error::{StorageError, StorageResult};
use crate::verify::hash_file;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use strata_catalog::{with_retry, CatalogStore, FileRecordRow};
use strata_core::hash::ContentHash;
use strata_core::StorageRef;

/// Catalog queries are retried this many times before a pass aborts.
pub(crate) const CATALOG_ATTEMPTS: u32 = 3;

/// Expected content for one cataloged file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedFile {
    pub hash: ContentHash,
    pub size: u64,
}

/// Why a file was judged suspicious.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspicionReason {
    /// No active catalog record for this storage ref.
    NotInCatalog,
    /// Content hash differs from the catalog record.
    HashMismatch,
    /// Byte length differs from the catalog record.
    SizeMismatch,
    /// The file could not be read; judged suspicious rather than trusted.
    Unreadable,
}

impl SuspicionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuspicionReason::NotInCatalog => "not_in_catalog",
            SuspicionReason::HashMismatch => "hash_mismatch",
            SuspicionReason::SizeMismatch => "size_mismatch",
            SuspicionReason::Unreadable => "unreadable",
        }
    }
}

/// Outcome of judging one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Legitimate,
    Suspicious(SuspicionReason),
}

/// Point-in-time snapshot of active catalog records.
#[derive(Debug, Default)]
pub struct Whitelist {
    entries: HashMap<StorageRef, ExpectedFile>,
}

impl Whitelist {
    /// Build a whitelist from catalog rows.
    ///
    /// A malformed row is a hard error: silently dropping it would turn
    /// a legitimate on-disk file into a deletion candidate.
    pub fn from_records(rows: Vec<FileRecordRow>) -> StorageResult<Self> {
        let mut entries = HashMap::with_capacity(rows.len());
        for row in rows {
            let storage_ref = StorageRef::parse(&row.storage_ref).map_err(|e| {
                StorageError::Config(format!(
                    "catalog row has invalid storage ref {:?}: {e}",
                    row.storage_ref
                ))
            })?;
            let hash = ContentHash::from_hex(&row.content_hash).map_err(|e| {
                StorageError::Config(format!(
                    "catalog row {} has invalid content hash: {e}",
                    storage_ref
                ))
            })?;
            let size = u64::try_from(row.size_bytes).map_err(|_| {
                StorageError::Config(format!(
                    "catalog row {} has negative size {}",
                    storage_ref, row.size_bytes
                ))
            })?;
            entries.insert(storage_ref, ExpectedFile { hash, size });
        }
        Ok(Self { entries })
    }

    pub fn get(&self, storage_ref: &StorageRef) -> Option<&ExpectedFile> {
        self.entries.get(storage_ref)
    }

    pub fn contains(&self, storage_ref: &StorageRef) -> bool {
        self.entries.contains_key(storage_ref)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StorageRef, &ExpectedFile)> {
        self.entries.iter()
    }
}

/// Judges on-disk files against catalog snapshots.
pub struct ValidationService {
    catalog: Arc<dyn CatalogStore>,
}

impl ValidationService {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }

    /// Load a fresh whitelist snapshot.
    ///
    /// Aborts (rather than returning a partial snapshot) when the catalog
    /// stays unreachable: a pass run against an incomplete whitelist would
    /// misjudge legitimate files.
    pub async fn load_whitelist(&self) -> StorageResult<Whitelist> {
        let rows = with_retry(CATALOG_ATTEMPTS, || self.catalog.list_active_records()).await?;
        let whitelist = Whitelist::from_records(rows)?;
        tracing::debug!(entries = whitelist.len(), "Loaded catalog whitelist snapshot");
        Ok(whitelist)
    }

    /// Judge one on-disk file against the whitelist.
    ///
    /// Fail-closed: any doubt, including I/O failure while reading the
    /// file, yields a suspicious verdict. `rel` is the path relative to
    /// the tier's blob namespace.
    pub async fn judge(&self, whitelist: &Whitelist, rel: &str, path: &Path) -> Verdict {
        let storage_ref = match StorageRef::parse(rel) {
            Ok(r) => r,
            Err(_) => return Verdict::Suspicious(SuspicionReason::NotInCatalog),
        };

        let Some(expected) = whitelist.get(&storage_ref) else {
            return Verdict::Suspicious(SuspicionReason::NotInCatalog);
        };

        let (actual_hash, actual_size) = match hash_file(path).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(storage_ref = rel, error = %e, "Failed to read file during validation");
                return Verdict::Suspicious(SuspicionReason::Unreadable);
            }
        };

        if actual_size != expected.size {
            return Verdict::Suspicious(SuspicionReason::SizeMismatch);
        }
        if actual_hash != expected.hash {
            return Verdict::Suspicious(SuspicionReason::HashMismatch);
        }
        Verdict::Legitimate
    }
}
