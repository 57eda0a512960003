//! Promotion of blobs from the ephemeral tier to the persistent tier.

use crate::error::StorageResult;
use crate::tier::FilesystemTier;
use crate::validate::Whitelist;
use crate::verify::hash_file;
use strata_core::StorageRef;
use tokio::fs;
use tracing::instrument;

/// Per-file result of a promotion attempt.
///
/// Everything short of `Failed` is a settled state; batch callers count
/// outcomes rather than aborting on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionOutcome {
    /// Copied and verified on the persistent tier.
    Promoted,
    /// Destination already holds identical content.
    AlreadyPromoted,
    /// Source blob is gone; nothing to do.
    SourceMissing,
    /// Destination holds different content and the source does not match
    /// the catalog; the destination was left untouched.
    Conflict,
    /// Post-copy verification failed; the bad copy was removed.
    VerifyFailed,
    /// Transient failure, safe to retry on the next pass.
    Failed(String),
}

impl PromotionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PromotionOutcome::Promoted => "promoted",
            PromotionOutcome::AlreadyPromoted => "already_promoted",
            PromotionOutcome::SourceMissing => "source_missing",
            PromotionOutcome::Conflict => "conflict",
            PromotionOutcome::VerifyFailed => "verify_failed",
            PromotionOutcome::Failed(_) => "failed",
        }
    }
}

/// Copies blobs from the ephemeral tier into the persistent tier.
///
/// The destination mirrors the ephemeral layout. Promotion is idempotent
/// per ref and safe to run concurrently for distinct refs; concurrent
/// promotion of the same ref converges because both writers install
/// identical verified content via temp-and-rename.
pub struct PromotionService<'a> {
    ephemeral: &'a FilesystemTier,
    persistent: &'a FilesystemTier,
}

impl<'a> PromotionService<'a> {
    pub fn new(ephemeral: &'a FilesystemTier, persistent: &'a FilesystemTier) -> Self {
        Self {
            ephemeral,
            persistent,
        }
    }

    /// Promote one blob. Never removes the source; source cleanup is the
    /// caller's decision.
    #[instrument(skip(self, whitelist), fields(storage_ref = %storage_ref))]
    pub async fn promote(
        &self,
        whitelist: &Whitelist,
        storage_ref: &StorageRef,
    ) -> PromotionOutcome {
        let src = self.ephemeral.blob_path(storage_ref);

        match fs::try_exists(&src).await {
            Ok(true) => {}
            Ok(false) => return PromotionOutcome::SourceMissing,
            Err(e) => return PromotionOutcome::Failed(format!("stat source: {e}")),
        }

        let (src_hash, src_size) = match hash_file(&src).await {
            Ok(pair) => pair,
            Err(e) => return PromotionOutcome::Failed(format!("read source: {e}")),
        };

        let dest = self.persistent.blob_path(storage_ref);
        let dest_exists = match fs::try_exists(&dest).await {
            Ok(v) => v,
            Err(e) => return PromotionOutcome::Failed(format!("stat destination: {e}")),
        };

        if dest_exists {
            match hash_file(&dest).await {
                Ok((dest_hash, _)) if dest_hash == src_hash => {
                    return PromotionOutcome::AlreadyPromoted;
                }
                // Different content, or unreadable destination. Overwrite
                // only when the source provably matches the catalog;
                // otherwise leave the destination alone and surface the
                // conflict instead of guessing which copy is right.
                _ => {
                    let source_legitimate = whitelist
                        .get(storage_ref)
                        .is_some_and(|e| e.hash == src_hash && e.size == src_size);
                    if !source_legitimate {
                        tracing::warn!(
                            storage_ref = %storage_ref,
                            "Destination conflict with unverified source, refusing overwrite"
                        );
                        return PromotionOutcome::Conflict;
                    }
                    tracing::info!(
                        storage_ref = %storage_ref,
                        "Overwriting stale destination with catalog-verified source"
                    );
                }
            }
        }

        let installed = match self.persistent.install_file(&src, storage_ref).await {
            Ok(path) => path,
            Err(e) => return PromotionOutcome::Failed(format!("install: {e}")),
        };

        // Re-read what actually landed on disk before trusting it
        match hash_file(&installed).await {
            Ok((dest_hash, _)) if dest_hash == src_hash => PromotionOutcome::Promoted,
            Ok(_) => {
                tracing::error!(
                    storage_ref = %storage_ref,
                    "Promoted copy does not match source, removing"
                );
                let _ = fs::remove_file(&installed).await;
                PromotionOutcome::VerifyFailed
            }
            Err(e) => {
                let _ = fs::remove_file(&installed).await;
                PromotionOutcome::Failed(format!("verify destination: {e}"))
            }
        }
    }

    /// Stage a file into the ephemeral tier. Test and tooling helper.
    pub async fn stage_source(
        &self,
        storage_ref: &StorageRef,
        content: &[u8],
    ) -> StorageResult<()> {
        let path = self.ephemeral.blob_path(storage_ref);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::FilesystemTier;
    use strata_catalog::FileRecordRow;
    use strata_core::hash::ContentHash;
    use tempfile::tempdir;

    struct Setup {
        _eph_dir: tempfile::TempDir,
        _per_dir: tempfile::TempDir,
        ephemeral: FilesystemTier,
        persistent: FilesystemTier,
    }

    async fn setup() -> Setup {
        let eph_dir = tempdir().unwrap();
        let per_dir = tempdir().unwrap();
        Setup {
            ephemeral: FilesystemTier::new("ephemeral", eph_dir.path()).await.unwrap(),
            persistent: FilesystemTier::new("persistent", per_dir.path()).await.unwrap(),
            _eph_dir: eph_dir,
            _per_dir: per_dir,
        }
    }

    fn whitelist_of(entries: &[(&str, &[u8])]) -> Whitelist {
        let rows = entries
            .iter()
            .map(|(storage_ref, content)| FileRecordRow {
                storage_ref: storage_ref.to_string(),
                content_hash: ContentHash::compute(content).to_hex(),
                size_bytes: content.len() as i64,
            })
            .collect();
        Whitelist::from_records(rows).unwrap()
    }

    fn sref(s: &str) -> StorageRef {
        StorageRef::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_promote_round_trip_and_idempotence() {
        let s = setup().await;
        let svc = PromotionService::new(&s.ephemeral, &s.persistent);
        let r = sref("2026/f1");
        svc.stage_source(&r, b"hello").await.unwrap();
        let wl = whitelist_of(&[("2026/f1", b"hello")]);

        assert_eq!(svc.promote(&wl, &r).await, PromotionOutcome::Promoted);
        let promoted = tokio::fs::read(s.persistent.blob_path(&r)).await.unwrap();
        assert_eq!(promoted, b"hello");
        // Source stays until the caller decides
        assert!(s.ephemeral.exists(&r).await.unwrap());

        assert_eq!(svc.promote(&wl, &r).await, PromotionOutcome::AlreadyPromoted);
    }

    #[tokio::test]
    async fn test_promote_missing_source() {
        let s = setup().await;
        let svc = PromotionService::new(&s.ephemeral, &s.persistent);
        let wl = whitelist_of(&[]);
        assert_eq!(
            svc.promote(&wl, &sref("absent")).await,
            PromotionOutcome::SourceMissing
        );
    }

    #[tokio::test]
    async fn test_conflict_with_unverified_source_refuses_overwrite() {
        let s = setup().await;
        let svc = PromotionService::new(&s.ephemeral, &s.persistent);
        let r = sref("doc");

        svc.stage_source(&r, b"tampered").await.unwrap();
        tokio::fs::write(s.persistent.blob_path(&r), b"original").await.unwrap();

        // Catalog expects something other than what the source holds
        let wl = whitelist_of(&[("doc", b"original")]);
        assert_eq!(svc.promote(&wl, &r).await, PromotionOutcome::Conflict);
        assert_eq!(
            tokio::fs::read(s.persistent.blob_path(&r)).await.unwrap(),
            b"original"
        );
    }

    #[tokio::test]
    async fn test_conflict_with_verified_source_overwrites() {
        let s = setup().await;
        let svc = PromotionService::new(&s.ephemeral, &s.persistent);
        let r = sref("doc");

        svc.stage_source(&r, b"fresh").await.unwrap();
        tokio::fs::write(s.persistent.blob_path(&r), b"stale").await.unwrap();

        let wl = whitelist_of(&[("doc", b"fresh")]);
        assert_eq!(svc.promote(&wl, &r).await, PromotionOutcome::Promoted);
        assert_eq!(
            tokio::fs::read(s.persistent.blob_path(&r)).await.unwrap(),
            b"fresh"
        );
    }

    #[tokio::test]
    async fn test_stray_temp_file_never_becomes_a_blob() {
        let s = setup().await;
        let svc = PromotionService::new(&s.ephemeral, &s.persistent);
        let r = sref("doc");
        svc.stage_source(&r, b"content").await.unwrap();

        // A crashed writer's truncated temp file sits in tmp/
        tokio::fs::write(
            s.persistent.root().join("tmp/.install.dead"),
            b"con",
        )
        .await
        .unwrap();

        let wl = whitelist_of(&[("doc", b"content")]);
        assert_eq!(svc.promote(&wl, &r).await, PromotionOutcome::Promoted);

        let blobs = s.persistent.list_blobs().await.unwrap();
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].rel, "doc");
    }
}
