//! Database models mapping to the catalog schema.
//!
//! Only the fields this subsystem reads are projected; the catalog's full
//! schema is owned elsewhere.

use sqlx::FromRow;
use time::OffsetDateTime;

/// A file record projected to the fields needed for validation.
///
/// Rows are only returned for non-deleted files (`deleted_at IS NULL`).
#[derive(Debug, Clone, FromRow)]
pub struct FileRecordRow {
    /// Opaque storage reference, unique per tier namespace.
    pub storage_ref: String,
    /// Expected SHA-256 content hash, lowercase hex.
    pub content_hash: String,
    /// Expected size in bytes.
    pub size_bytes: i64,
}

/// A file reference with its soft-deletion marker, for coverage
/// verification.
#[derive(Debug, Clone, FromRow)]
pub struct FileRefRow {
    pub storage_ref: String,
    pub deleted_at: Option<OffsetDateTime>,
}
