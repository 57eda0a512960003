//! Filesystem-backed storage tiers.
//!
//! A tier root owns three namespaces:
//! - `files/`  durable blobs addressed by storage ref
//! - `tmp/`    in-flight writes (install temp files, probes)
//! - `chunks/` upload staging owned by the ingest service
//!
//! Lifecycle passes only ever walk `files/`, so `tmp/` and `chunks/` are
//! structurally invisible to reconciliation and can never be reaped as
//! orphans mid-write.

use crate::error::{StorageError, StorageResult};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use strata_core::StorageRef;
use strata_core::config::TierConfig;
use tokio::fs;
use tracing::instrument;
use uuid::Uuid;

const FILES_NAMESPACE: &str = "files";
const TMP_NAMESPACE: &str = "tmp";
const CHUNKS_NAMESPACE: &str = "chunks";

/// A blob found while walking a tier's `files/` namespace.
///
/// `rel` is the path relative to `files/`, which is the blob's storage
/// ref if the name is well formed. Malformed names still surface here so
/// reconciliation can report them as orphans.
#[derive(Debug, Clone)]
pub struct BlobEntry {
    pub rel: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// One filesystem storage tier.
pub struct FilesystemTier {
    label: &'static str,
    root: PathBuf,
    files_root: PathBuf,
}

impl FilesystemTier {
    /// Create a tier at `root`, creating its namespaces if missing.
    pub async fn new(label: &'static str, root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        for ns in [FILES_NAMESPACE, TMP_NAMESPACE, CHUNKS_NAMESPACE] {
            fs::create_dir_all(root.join(ns)).await?;
        }
        let files_root = root.join(FILES_NAMESPACE);
        Ok(Self {
            label,
            root,
            files_root,
        })
    }

    /// Tier label for logging ("ephemeral" or "persistent").
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a validated storage ref's blob.
    ///
    /// Safe to join directly: the `StorageRef` charset excludes separators
    /// other than `/` and dot-only segments.
    pub fn blob_path(&self, storage_ref: &StorageRef) -> PathBuf {
        self.files_root.join(storage_ref.as_str())
    }

    /// Path of an in-progress upload's temp file in `tmp/`.
    pub fn temp_path(&self, upload_id: &str) -> StorageResult<PathBuf> {
        Self::check_upload_id(upload_id)?;
        Ok(self.root.join(TMP_NAMESPACE).join(upload_id))
    }

    /// Path of one staged chunk of an in-progress upload in `chunks/`.
    pub fn chunk_path(&self, upload_id: &str, index: u32) -> StorageResult<PathBuf> {
        Self::check_upload_id(upload_id)?;
        Ok(self
            .root
            .join(CHUNKS_NAMESPACE)
            .join(upload_id)
            .join(format!("{index:06}")))
    }

    /// Upload ids are server-generated single segments, but they arrive
    /// through the same untrusted flows as storage refs and get the same
    /// allow-listed charset treatment before touching a path.
    fn check_upload_id(upload_id: &str) -> StorageResult<()> {
        let well_formed = !upload_id.is_empty()
            && upload_id.len() <= 128
            && upload_id != "."
            && upload_id != ".."
            && upload_id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
        if well_formed {
            Ok(())
        } else {
            Err(StorageError::InvalidRef(format!(
                "invalid upload id: {upload_id}"
            )))
        }
    }

    /// Resolve an untrusted relative name to a path inside `files/`.
    ///
    /// This is the defense-in-depth boundary for names that did not come
    /// through `StorageRef`: walker output, orphan lists, anything read
    /// back off disk.
    pub async fn resolve(&self, rel: &str) -> StorageResult<PathBuf> {
        let files_root = self.files_root.clone();
        let rel = rel.to_string();
        tokio::task::spawn_blocking(move || Self::resolve_sync(&files_root, &rel))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Synchronous path resolution with traversal protection.
    ///
    /// Rejects anything that would escape `files/`, including symlink-based
    /// escapes where a link inside the tier points outside it.
    fn resolve_sync(files_root: &Path, rel: &str) -> StorageResult<PathBuf> {
        // Fast path for obvious traversal attempts
        if rel.contains("..") || rel.starts_with('/') || rel.starts_with('\\') {
            return Err(StorageError::InvalidRef(format!(
                "path traversal not allowed: {rel}"
            )));
        }

        // Segment-level check; Path::components() silently drops interior
        // "." segments, so it cannot be relied on alone
        if rel.split('/').any(|seg| seg.is_empty() || seg == ".") {
            return Err(StorageError::InvalidRef(format!(
                "empty or dot segment in: {rel}"
            )));
        }

        for component in Path::new(rel).components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(StorageError::InvalidRef(format!(
                        "contains unsafe path component: {rel}"
                    )));
                }
            }
        }

        let path = files_root.join(rel);

        let root_canonical = files_root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize tier root: {e}"),
            ))
        })?;

        // Existing paths (including broken symlinks) are canonicalized and
        // checked against the root. This catches symlinks inside the tier
        // that point outside it.
        match std::fs::symlink_metadata(&path) {
            Ok(meta) => {
                let canonical = path.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidRef(format!("symlink target missing or invalid: {rel}"))
                    } else {
                        StorageError::Io(std::io::Error::new(
                            e.kind(),
                            format!("failed to canonicalize path: {e}"),
                        ))
                    }
                })?;

                if !canonical.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidRef(format!(
                        "resolved path escapes tier root: {rel}"
                    )));
                }

                // Return the original (non-canonical) path so callers see
                // paths consistent with walker output.
                return Ok(path);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(StorageError::Io(std::io::Error::new(
                    err.kind(),
                    format!("failed to stat path: {err}"),
                )));
            }
        }

        // For paths that don't exist yet, verify the nearest existing
        // ancestor does not escape the root through a symlinked directory.
        let mut ancestor = path.as_path();
        while let Some(parent) = ancestor.parent() {
            match std::fs::symlink_metadata(parent) {
                Ok(meta) => {
                    let parent_canonical = parent.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidRef(format!(
                                "ancestor symlink target missing or invalid: {rel}"
                            ))
                        } else {
                            StorageError::Io(std::io::Error::new(
                                e.kind(),
                                format!("failed to canonicalize ancestor: {e}"),
                            ))
                        }
                    })?;

                    if !parent_canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidRef(format!(
                            "ancestor path escapes tier root: {rel}"
                        )));
                    }
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(StorageError::Io(std::io::Error::new(
                        err.kind(),
                        format!("failed to stat ancestor: {err}"),
                    )));
                }
            }
            ancestor = parent;
        }

        Ok(path)
    }

    #[instrument(skip(self), fields(tier = self.label))]
    pub async fn exists(&self, storage_ref: &StorageRef) -> StorageResult<bool> {
        let path = self.blob_path(storage_ref);
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    /// Install a file into this tier under `storage_ref`, atomically.
    ///
    /// The content is copied to a uniquely named temp file in `tmp/`,
    /// fsynced, then renamed into place. Readers either see the old blob
    /// or the complete new one, never a partial write.
    #[instrument(skip(self, src), fields(tier = self.label))]
    pub async fn install_file(
        &self,
        src: &Path,
        storage_ref: &StorageRef,
    ) -> StorageResult<PathBuf> {
        let dest = self.blob_path(storage_ref);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self
            .root
            .join(TMP_NAMESPACE)
            .join(format!(".install.{}", Uuid::new_v4()));

        let result = async {
            let mut src_file = fs::File::open(src).await?;
            let mut temp_file = fs::File::create(&temp_path).await?;
            tokio::io::copy(&mut src_file, &mut temp_file).await?;
            // Flush to disk before the rename makes the blob visible
            temp_file.sync_all().await?;
            drop(temp_file);
            fs::rename(&temp_path, &dest).await?;
            Ok::<_, std::io::Error>(())
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }

        Ok(dest)
    }

    /// Delete a blob by its relative name. Returns false if it was
    /// already gone.
    ///
    /// Empty parent directories are pruned best-effort up to the
    /// namespace root.
    #[instrument(skip(self), fields(tier = self.label))]
    pub async fn delete(&self, rel: &str) -> StorageResult<bool> {
        let path = self.resolve(rel).await?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(StorageError::Io(e)),
        }

        let mut parent = path.parent();
        while let Some(dir) = parent {
            if dir == self.files_root {
                break;
            }
            if fs::remove_dir(dir).await.is_err() {
                // Not empty, or already gone
                break;
            }
            parent = dir.parent();
        }

        Ok(true)
    }

    /// Walk `files/` and return every regular file found.
    ///
    /// Symlinks are skipped, never followed; a symlink inside a tier is
    /// itself suspicious and gets a warning.
    #[instrument(skip(self), fields(tier = self.label))]
    pub async fn list_blobs(&self) -> StorageResult<Vec<BlobEntry>> {
        let mut results = Vec::new();

        match fs::try_exists(&self.files_root).await {
            Ok(false) => return Ok(results),
            Ok(true) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(results),
            Err(e) => return Err(StorageError::Io(e)),
        }

        let mut stack = vec![self.files_root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                // file_type() does not follow symlinks
                let file_type = entry.file_type().await?;
                if file_type.is_symlink() {
                    tracing::warn!(tier = self.label, path = %path.display(), "Skipping symlink in tier");
                    continue;
                }
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file()
                    && let Ok(rel) = path.strip_prefix(&self.files_root)
                {
                    let meta = entry.metadata().await?;
                    results.push(BlobEntry {
                        rel: rel.to_string_lossy().to_string(),
                        size: meta.len(),
                        modified: meta.modified().ok(),
                        path,
                    });
                }
            }
        }

        Ok(results)
    }

    /// Verify the tier is writable by round-tripping a probe file.
    pub async fn verify_writable(&self) -> StorageResult<()> {
        use tokio::io::AsyncWriteExt;

        let probe = self
            .root
            .join(TMP_NAMESPACE)
            .join(format!(".probe.{}", Uuid::new_v4()));
        let mut file = fs::File::create(&probe).await?;
        file.write_all(b"probe").await?;
        file.sync_all().await?;
        drop(file);
        fs::remove_file(&probe).await?;
        Ok(())
    }
}

/// The ephemeral tier plus the optional persistent tier.
pub struct TierSet {
    pub ephemeral: FilesystemTier,
    pub persistent: Option<FilesystemTier>,
}

impl TierSet {
    /// Build the tier set from configuration, creating tier layouts as
    /// needed.
    pub async fn from_config(config: &TierConfig) -> StorageResult<Self> {
        let ephemeral = FilesystemTier::new("ephemeral", &config.ephemeral_root).await?;
        let persistent = match &config.persistent_root {
            Some(root) => Some(FilesystemTier::new("persistent", root).await?),
            None => None,
        };
        Ok(Self {
            ephemeral,
            persistent,
        })
    }
}
