//! Tiered storage lifecycle for Strata.
//!
//! Blobs land on an ephemeral tier and are promoted to an optional
//! persistent tier once verified against the read-only file catalog.
//! Batch passes (sync, cleanup, rotation) keep both tiers consistent
//! with the catalog and are idempotent by construction.

pub mod error;
pub mod promote;
pub mod reconcile;
pub mod releaser;
pub mod rotation;
pub mod sync;
pub mod tier;
pub mod validate;
pub mod verify;

pub use error::{StorageError, StorageResult};
pub use promote::{PromotionOutcome, PromotionService};
pub use reconcile::{CleanupFailure, CleanupReport, OrphanReport, ReconciliationService};
pub use releaser::{CacheReleaser, NoopReleaser};
pub use rotation::{RotationCoordinator, RotationPhase, RotationReport};
pub use sync::{SyncCoordinator, SyncReport};
pub use tier::{BlobEntry, FilesystemTier, TierSet};
pub use validate::{ExpectedFile, SuspicionReason, ValidationService, Verdict, Whitelist};
pub use verify::hash_file;
