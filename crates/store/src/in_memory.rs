//! In-memory blob store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use everloop_core::blob::{BlobMetadata, BlobStore, ListedBlob};
use everloop_core::StoreError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An in-memory blob store backed by a BTreeMap (sorted prefix listing for
/// free). Useful for tests and sessions where persistence isn't needed.
pub struct InMemoryBlobStore {
    blobs: Arc<RwLock<BTreeMap<String, (Vec<u8>, BlobMetadata)>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        metadata: BlobMetadata,
    ) -> Result<(), StoreError> {
        self.blobs
            .write()
            .await
            .insert(path.to_string(), (bytes, metadata));
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.read().await.get(path).map(|(b, _)| b.clone()))
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self.blobs.read().await.contains_key(path))
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self.blobs.write().await.remove(path).is_some())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ListedBlob>, StoreError> {
        let blobs = self.blobs.read().await;
        Ok(blobs
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, (_, metadata))| ListedBlob {
                path: path.clone(),
                metadata: metadata.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let store = InMemoryBlobStore::new();
        store
            .put("a/b", b"hello".to_vec(), BlobMetadata::new())
            .await
            .unwrap();
        assert!(store.exists("a/b").await.unwrap());
        assert_eq!(store.get("a/b").await.unwrap().unwrap(), b"hello");
        assert!(store.delete("a/b").await.unwrap());
        assert!(!store.delete("a/b").await.unwrap());
        assert!(store.get("a/b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prefix_listing_is_scoped_and_sorted() {
        let store = InMemoryBlobStore::new();
        for path in ["m/2026/01/01/x", "m/2026/01/02/y", "other/z"] {
            store
                .put(path, vec![1], BlobMetadata::new())
                .await
                .unwrap();
        }
        let listed = store.list_prefix("m/2026/").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].path < listed[1].path);
    }
}
