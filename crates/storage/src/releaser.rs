//! Cache-release collaborator used during rotation.

use crate::error::StorageResult;
use async_trait::async_trait;

/// Asks downstream read caches to drop handles into the ephemeral tier
/// before it is rotated away.
///
/// Implementations live at the deployment edge (frontend pools, CDN
/// purge hooks). Failure is recorded in the rotation report but never
/// aborts the run.
#[async_trait]
pub trait CacheReleaser: Send + Sync {
    async fn release_caches(&self) -> StorageResult<()>;
}

/// Releaser for deployments with no external caches.
pub struct NoopReleaser;

#[async_trait]
impl CacheReleaser for NoopReleaser {
    async fn release_caches(&self) -> StorageResult<()> {
        Ok(())
    }
}
