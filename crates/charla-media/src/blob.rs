//! Blob storage seam with a filesystem implementation.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::Result;

/// Durable storage for downloaded media bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `path` (bucket-relative). Returns a stable URL or
    /// path string recorded on the message row.
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<String>;
}

/// Filesystem blob store rooted at a directory. Paths are sanitized to stay
/// inside the root.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let mut out = self.root.clone();
        for part in path.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                continue;
            }
            out.push(part);
        }
        out
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, bytes: &[u8], _content_type: &str) -> Result<String> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        Ok(target.to_string_lossy().into_owned())
    }
}
