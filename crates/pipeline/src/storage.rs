//! Durable asset storage.
//!
//! Stored files are named by the SHA-256 of their bytes, so storing the
//! same download twice yields the same reference and a partially
//! retrieved job can simply be retried from the start.

use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use genforge_core::asset::{extension_for, AssetRef};
use genforge_core::hashing::sha256_hex;

use crate::error::StorageError;

/// Destination for retrieved asset bytes.
#[async_trait]
pub trait AssetStorage: Send + Sync {
    /// Persist `bytes` and return a local reference to them.
    ///
    /// `source_url` is only a naming hint for the file extension.
    async fn store(&self, bytes: &[u8], content_type: &str, source_url: &str) -> Result<AssetRef, StorageError>;
}

/// Content-addressed object name: `<sha256>.<ext>`.
pub fn object_name(bytes: &[u8], content_type: &str, source_url: &str) -> String {
    format!("{}.{}", sha256_hex(bytes), extension_for(content_type, source_url))
}

/// Stores assets under a directory on the local filesystem.
///
/// Files are sharded by the first two hex characters of their hash.
/// References are `public_prefix/<shard>/<name>`, suitable for a static
/// file server mounted at `public_prefix`.
pub struct LocalFsStorage {
    root: PathBuf,
    public_prefix: String,
}

impl LocalFsStorage {
    pub fn new(root: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        let public_prefix: String = public_prefix.into();
        Self {
            root: root.into(),
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AssetStorage for LocalFsStorage {
    async fn store(&self, bytes: &[u8], content_type: &str, source_url: &str) -> Result<AssetRef, StorageError> {
        if bytes.is_empty() {
            return Err(StorageError::Empty);
        }
        let name = object_name(bytes, content_type, source_url);
        let shard = &name[..2];
        let dir = self.root.join(shard);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(&name);
        if tokio::fs::try_exists(&path).await? {
            tracing::debug!(path = %path.display(), "Asset already stored");
        } else {
            write_complete(dir, path, bytes.to_vec()).await?;
        }

        Ok(AssetRef::local(
            format!("{}/{shard}/{name}", self.public_prefix),
            content_type,
            bytes.len() as u64,
        ))
    }
}

/// Write through a uniquely named temp file in `dir` and rename it into
/// place, so the final name only ever holds complete content.
async fn write_complete(dir: PathBuf, path: PathBuf, bytes: Vec<u8>) -> Result<(), StorageError> {
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(std::io::Error::other)??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn stores_content_addressed_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path(), "/files/");

        let asset = storage
            .store(b"png-bytes", "image/png", "https://cdn/x.png")
            .await
            .unwrap();

        let name = object_name(b"png-bytes", "image/png", "");
        let expected = format!("/files/{}/{name}", &name[..2]);
        assert_eq!(asset, AssetRef::local(expected, "image/png", 9));

        let on_disk = tokio::fs::read(dir.path().join(&name[..2]).join(&name)).await.unwrap();
        assert_eq!(on_disk, b"png-bytes");
    }

    #[tokio::test]
    async fn storing_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path(), "/files");

        let first = storage.store(b"same", "audio/mpeg", "").await.unwrap();
        let second = storage.store(b"same", "audio/mpeg", "").await.unwrap();
        assert_eq!(first, second);
        assert!(first.location().ends_with(".mp3"));
    }

    #[tokio::test]
    async fn concurrent_stores_of_identical_bytes_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path(), "/files");

        let results = futures::future::join_all(
            (0..8).map(|_| storage.store(b"shared-clip", "video/mp4", "")),
        )
        .await;

        let first = results[0].as_ref().unwrap().clone();
        for result in &results {
            assert_eq!(result.as_ref().unwrap(), &first);
        }

        let name = object_name(b"shared-clip", "video/mp4", "");
        let mut entries = tokio::fs::read_dir(dir.path().join(&name[..2])).await.unwrap();
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            files.push(entry.file_name().into_string().unwrap());
        }
        assert_eq!(files, vec![name]);
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path(), "/files");
        assert_matches!(storage.store(b"", "image/png", "").await, Err(StorageError::Empty));
    }
}
