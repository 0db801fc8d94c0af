//! File-backed blob store — durable persistence without external
//! infrastructure.
//!
//! Each blob lives at `<root>/<path>`; its metadata sidecar lives at
//! `<root>/<path>.meta.json`. Corrupted sidecars are skipped with a warning
//! rather than failing the listing.

use async_trait::async_trait;
use everloop_core::blob::{BlobMetadata, BlobStore, ListedBlob};
use everloop_core::StoreError;
use std::path::{Path, PathBuf};
use tracing::warn;

const META_SUFFIX: &str = ".meta.json";

/// A blob store rooted at a local directory.
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Create a store rooted at `root`. The directory is created lazily on
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default root: `~/.everloop/store`
    pub fn default_root() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".everloop").join("store")
    }

    fn blob_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn meta_path(&self, path: &str) -> PathBuf {
        self.root.join(format!("{path}{META_SUFFIX}"))
    }

    fn io_err(context: &str, e: std::io::Error) -> StoreError {
        StoreError::Storage(format!("{context}: {e}"))
    }

    fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                Self::walk(&path, out);
            } else {
                out.push(path);
            }
        }
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        metadata: BlobMetadata,
    ) -> Result<(), StoreError> {
        let blob = self.blob_path(path);
        if let Some(parent) = blob.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Self::io_err("create dir", e))?;
        }
        std::fs::write(&blob, &bytes).map_err(|e| Self::io_err("write blob", e))?;

        let meta_json = serde_json::to_vec(&metadata)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        std::fs::write(self.meta_path(path), meta_json)
            .map_err(|e| Self::io_err("write metadata", e))?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(self.blob_path(path)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err("read blob", e)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self.blob_path(path).is_file())
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        let _ = std::fs::remove_file(self.meta_path(path));
        match std::fs::remove_file(self.blob_path(path)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::io_err("delete blob", e)),
        }
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ListedBlob>, StoreError> {
        let mut files = Vec::new();
        Self::walk(&self.root, &mut files);

        let mut listed = Vec::new();
        for file in files {
            let Ok(rel) = file.strip_prefix(&self.root) else {
                continue;
            };
            let rel = rel.to_string_lossy().replace('\\', "/");
            if !rel.starts_with(prefix) || rel.ends_with(META_SUFFIX) {
                continue;
            }
            let metadata = match std::fs::read(self.meta_path(&rel)) {
                Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                    warn!(path = %rel, error = %e, "Skipping corrupted metadata sidecar");
                    BlobMetadata::new()
                }),
                Err(_) => BlobMetadata::new(),
            };
            listed.push(ListedBlob {
                path: rel,
                metadata,
            });
        }
        listed.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(listed)
    }
}
