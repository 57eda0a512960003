//! Streaming content verification.

use crate::error::StorageResult;
use std::path::Path;
use strata_core::hash::ContentHash;
use strata_core::HASH_CHUNK_SIZE;
use tokio::fs;
use tokio::io::AsyncReadExt;

/// Hash a file's content, returning its SHA-256 digest and byte length.
///
/// Reads in fixed-size chunks so arbitrarily large blobs never have to
/// fit in memory.
pub async fn hash_file(path: &Path) -> StorageResult<(ContentHash, u64)> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = ContentHash::hasher();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    Ok((hasher.finalize(), total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_hash_file_known_vector() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("f");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let (hash, size) = hash_file(&path).await.unwrap();
        assert_eq!(size, 5);
        assert_eq!(
            hash.to_hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn test_hash_file_larger_than_one_chunk() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("big");
        let data = vec![0xabu8; HASH_CHUNK_SIZE * 2 + 17];
        tokio::fs::write(&path, &data).await.unwrap();

        let (hash, size) = hash_file(&path).await.unwrap();
        assert_eq!(size, data.len() as u64);
        assert_eq!(hash, ContentHash::compute(&data));
    }

    #[tokio::test]
    async fn test_hash_file_missing() {
        let temp = tempdir().unwrap();
        assert!(hash_file(&temp.path().join("absent")).await.is_err());
    }
}
