//! Core domain types and shared logic for the Strata tiered storage service.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Storage references (validated opaque blob identifiers)
//! - Content hashes and incremental hashing
//! - Configuration for tiers, catalog, rotation, sync, and the server

pub mod config;
pub mod error;
pub mod hash;
pub mod storage_ref;

pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use storage_ref::StorageRef;

/// Chunk size used for streaming file hashing: 64 KiB.
///
/// Bounds peak memory independent of file size.
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Maximum length of a storage reference in bytes.
pub const MAX_STORAGE_REF_LEN: usize = 512;
