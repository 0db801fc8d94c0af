//! Short-term memory — TTL-bounded key/value cache over the blob boundary.
//!
//! Entries live under a flat `cache/` prefix with normalized-key paths. A
//! read past expiration behaves as absent and lazily removes the blob.

use chrono::{Duration, Utc};
use everloop_core::blob::{BlobMetadata, BlobStore};
use everloop_core::{CacheEntry, StoreError};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::retry::RetryPolicy;

const CACHE_PREFIX: &str = "cache/";

/// The short-term tier.
///
/// Constructed disabled when the backing store is unavailable at startup:
/// every operation then degrades to a safe no-op (warned once, at
/// construction) so the control loop keeps running without persistence.
pub struct ShortTermMemory {
    store: Option<Arc<dyn BlobStore>>,
    retry: RetryPolicy,
}

impl ShortTermMemory {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store: Some(store),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// A degraded instance whose operations are all no-ops.
    pub fn disabled() -> Self {
        warn!("Short-term memory unavailable — operating without working-context persistence");
        Self {
            store: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Write a value with an optional time-to-live.
    pub async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let Some(store) = &self.store else {
            debug!(key, "Short-term set skipped (store disabled)");
            return Ok(());
        };

        let entry = CacheEntry::new(key, value, ttl);
        let bytes = serde_json::to_vec(&entry)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut metadata = BlobMetadata::new();
        metadata.insert("key".into(), key.to_string());
        metadata.insert("created_at".into(), entry.created_at.to_rfc3339());
        if let Some(at) = entry.expires_at {
            metadata.insert("expires_at".into(), at.to_rfc3339());
        }

        let path = blob_path(key);
        self.retry
            .run("short_term.set", || {
                store.put(&path, bytes.clone(), metadata.clone())
            })
            .await
    }

    /// Read a value, or None if absent or expired.
    pub async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.get_entry(key).await?.map(|e| e.value))
    }

    /// Read a full cache entry, honoring expiration with lazy removal.
    pub async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };

        let path = blob_path(key);
        let bytes = self
            .retry
            .run("short_term.get", || store.get(&path))
            .await?;
        let Some(bytes) = bytes else {
            return Ok(None);
        };

        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(e) => e,
            Err(e) => {
                warn!(key, error = %e, "Dropping unreadable cache entry");
                let _ = store.delete(&path).await;
                return Ok(None);
            }
        };

        if entry.is_expired(Utc::now()) {
            // Lazy removal; an expired read behaves as absent
            let _ = store.delete(&path).await;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Delete a key; returns whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let path = blob_path(key);
        self.retry
            .run("short_term.delete", || store.delete(&path))
            .await
    }

    /// Whether a live (unexpired) value exists for the key.
    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get_entry(key).await?.is_some())
    }

    /// List live keys matching a glob pattern (`*` wildcard only).
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };

        let listed = self
            .retry
            .run("short_term.keys", || store.list_prefix(CACHE_PREFIX))
            .await?;

        let now = Utc::now();
        let mut keys = Vec::new();
        for blob in listed {
            // The sidecar carries the original (pre-normalization) key
            let Some(key) = blob.metadata.get("key") else {
                continue;
            };
            if !glob_match(pattern, key) {
                continue;
            }
            let expired = blob
                .metadata
                .get("expires_at")
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .is_some_and(|at| now >= at);
            if !expired {
                keys.push(key.clone());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Normalize a key into a flat blob path.
fn blob_path(key: &str) -> String {
    let normalized: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{CACHE_PREFIX}{normalized}")
}

/// Match a key against a glob pattern supporting only the `*` wildcard.
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    // Pattern ends with '*' (or was all wildcards)
    true
}
