//! Object store trait — the blob boundary backing both memory tiers.

use async_trait::async_trait;
use std::collections::HashMap;
use crate::error::StoreError;

/// Small indexed metadata stored alongside a blob.
pub type BlobMetadata = HashMap<String, String>;

/// A blob path with its metadata sidecar, as returned by prefix listing.
#[derive(Debug, Clone)]
pub struct ListedBlob {
    pub path: String,
    pub metadata: BlobMetadata,
}

/// The object store boundary.
///
/// Paths are `/`-separated and opaque to the store. Long-term entries live
/// under date partitions (`YYYY/MM/DD/{id}`); short-term entries under a
/// flat normalized-key path.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// A human-readable name for this store (e.g. "in_memory", "file").
    fn name(&self) -> &str;

    /// Write a blob, overwriting any existing one at the same path.
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        metadata: BlobMetadata,
    ) -> std::result::Result<(), StoreError>;

    /// Read a blob, or None if absent.
    async fn get(&self, path: &str) -> std::result::Result<Option<Vec<u8>>, StoreError>;

    /// Whether a blob exists at the path.
    async fn exists(&self, path: &str) -> std::result::Result<bool, StoreError>;

    /// Delete a blob; returns whether one existed.
    async fn delete(&self, path: &str) -> std::result::Result<bool, StoreError>;

    /// List blobs whose path starts with `prefix`, with their metadata.
    async fn list_prefix(&self, prefix: &str)
    -> std::result::Result<Vec<ListedBlob>, StoreError>;
}
